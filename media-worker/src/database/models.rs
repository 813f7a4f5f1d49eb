//! Row models for the tables the worker reads and writes.

use sqlx::FromRow;

/// A content-addressed pool artifact (`file_storage` row).
#[derive(Debug, Clone, FromRow)]
pub struct PoolEntryRow {
    pub id: i64,
    pub file_hash_sha1: String,
    pub physical_path: String,
    pub file_size_bytes: i64,
    pub file_extension: Option<String>,
    pub youtube_url: Option<String>,
    pub title: Option<String>,
    pub is_protected: bool,
    pub downloaded_at: Option<String>,
    pub access_count: i64,
    pub last_accessed_at: Option<String>,
}

/// A per-user view onto a pool entry (`user_symlinks` row).
#[derive(Debug, Clone, FromRow)]
pub struct UserLinkRow {
    pub id: i64,
    pub user_chat_id: i64,
    pub file_hash_sha1: String,
    pub symlink_path: String,
    pub is_protected: bool,
    pub created_at: Option<String>,
}

/// Cached video metadata (`youtube_metadata_cache` row).
#[derive(Debug, Clone, FromRow)]
pub struct MetadataCacheRow {
    pub video_id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_seconds: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub is_age_restricted: bool,
    pub is_private: bool,
}

/// Upload cache entry (`file_cache` row).
#[derive(Debug, Clone, FromRow)]
pub struct UploadCacheRow {
    pub file_hash_sha256: String,
    pub file_path: String,
    pub channel_msg_id: i64,
    pub file_size_bytes: Option<i64>,
}
