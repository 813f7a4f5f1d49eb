//! Outbound interface to the large-file upload transport.
//!
//! The transport itself (the chat-channel client) lives in a collaborator
//! process/crate; the worker only defines the seam, drives retries and
//! caches results by content hash so identical bytes are never shipped
//! twice.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// Progress callback for an in-flight upload: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Uploads a file to the shared storage channel.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Upload `file_path`, returning the channel message id.
    async fn upload(&self, file_path: &Path, filename: &str, progress: ProgressFn) -> Result<i64>;
}
