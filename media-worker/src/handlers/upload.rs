//! Large-file upload handler with digest-keyed re-upload skipping.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::context::WorkerContext;
use crate::error::ErrorCode;
use crate::ipc::{IpcSender, Request};
use crate::{Error, Result};

/// Minimum seconds between outgoing upload progress frames.
const PROGRESS_THROTTLE_SECS: u64 = 3;

/// Handle the `mtproto_upload` action.
pub async fn handle_mtproto_upload(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();

    let file_path = request
        .param_str("file_path")
        .map(PathBuf::from)
        .ok_or_else(|| Error::validation("Missing 'file_path' parameter"))?;
    let filename = request
        .param_str("filename")
        .or_else(|| {
            file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    if !tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
        ipc.send_error(
            &task_id,
            &format!("File not found: {}", file_path.display()),
            ErrorCode::FileNotFound,
        );
        return Ok(());
    }

    let Some(transport) = ctx.upload_transport.clone() else {
        ipc.send_error(
            &task_id,
            "Upload transport is not connected",
            ErrorCode::MtprotoNotConnected,
        );
        return Ok(());
    };

    // Identical bytes are never shipped twice, across users.
    let file_hash = hash_file_sha256(&file_path).await?;
    if let Some(cached) = ctx.cache.get_upload(&file_hash).await? {
        info!(task_id, filename, channel_msg_id = cached.channel_msg_id, "upload cache hit");
        ipc.send(
            &task_id,
            "done",
            json!({ "channel_msg_id": cached.channel_msg_id, "cached": true }),
        );
        return Ok(());
    }

    let file_size = tokio::fs::metadata(&file_path)
        .await
        .map_err(|e| Error::io_path("reading metadata", &file_path, e))?
        .len();

    ipc.send_progress(&task_id, 0, "", 0, "uploading");

    let mut attempt = 0u32;
    let channel_msg_id = loop {
        attempt += 1;

        let progress_cb = progress_callback(ipc.clone(), task_id.clone());
        match transport.upload(&file_path, &filename, progress_cb).await {
            Ok(id) => break id,
            Err(e) if attempt < ctx.config.max_retries => {
                warn!(task_id, attempt, error = %e, "upload attempt failed; retrying");
                tokio::time::sleep(std::time::Duration::from_secs(1u64 << attempt)).await;
            }
            Err(e) => {
                warn!(task_id, attempt, error = %e, "upload failed");
                ipc.send_error(
                    &task_id,
                    &format!("Upload failed: {e}"),
                    ErrorCode::MtprotoUploadFailed,
                );
                return Ok(());
            }
        }
    };

    ctx.cache
        .set_upload(
            &file_hash,
            &file_path.to_string_lossy(),
            channel_msg_id,
            file_size as i64,
        )
        .await?;

    info!(task_id, filename, channel_msg_id, "upload completed");
    ipc.send(
        &task_id,
        "done",
        json!({ "channel_msg_id": channel_msg_id, "cached": false }),
    );
    Ok(())
}

/// Throttled progress callback for the transport.
fn progress_callback(ipc: IpcSender, task_id: String) -> crate::upload::ProgressFn {
    let started = Instant::now();
    let last_emit: Mutex<Option<Instant>> = Mutex::new(None);

    Box::new(move |sent, total| {
        let now = Instant::now();
        {
            let mut last = match last_emit.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if last.is_some_and(|t| now.duration_since(t).as_secs() < PROGRESS_THROTTLE_SECS) {
                return;
            }
            *last = Some(now);
        }

        let percent = if total > 0 {
            ((sent as f64 / total as f64) * 100.0) as u8
        } else {
            0
        };
        let elapsed = started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            format!("{:.1} MB/s", sent as f64 / elapsed / (1024.0 * 1024.0))
        } else {
            String::new()
        };
        ipc.send_progress(&task_id, percent, &speed, 0, "uploading");
    })
}

/// SHA-256 of a file's bytes, computed off the async runtime.
pub async fn hash_file_sha256(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)
            .map_err(|e| Error::io_path("opening file for hashing", &path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 65536];
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::io_path("hashing file", &path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Other(format!("hash task failed: {e}")))?
}
