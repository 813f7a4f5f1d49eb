//! Repository for the dedup storage tables.
//!
//! `file_storage` and `user_symlinks` reference each other only through the
//! content hash — string keys, never in-memory shared pointers — so the
//! repository is the single place that join is expressed.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{PoolEntryRow, UserLinkRow};

/// New pool entry to record after a file lands in the pool.
#[derive(Debug, Clone)]
pub struct NewPoolEntry {
    pub file_hash_sha1: String,
    pub physical_path: String,
    pub file_size_bytes: i64,
    pub file_extension: String,
    pub youtube_url: String,
    pub title: String,
}

/// Data access for pool entries, user links and dedup bookkeeping.
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Record a new pool entry; a concurrent duplicate insert is a no-op.
    async fn insert_pool_entry(&self, entry: &NewPoolEntry) -> Result<()>;

    /// Find a pool entry by its content hash.
    async fn find_pool_entry(&self, file_hash: &str) -> Result<Option<PoolEntryRow>>;

    /// Find a pool entry whose origin URL mentions the given video id.
    async fn find_pool_entry_by_video_id(&self, video_id: &str) -> Result<Option<PoolEntryRow>>;

    /// Upgrade the stored origin URL to a specific video URL.
    async fn upgrade_youtube_url(&self, file_hash: &str, youtube_url: &str) -> Result<()>;

    /// Bump access stats for a pool entry.
    async fn touch_pool_entry(&self, file_hash: &str) -> Result<()>;

    /// Record (or replace) a user link at `symlink_path`.
    async fn record_user_link(
        &self,
        user_chat_id: i64,
        file_hash: &str,
        symlink_path: &str,
    ) -> Result<()>;

    /// Look up a user link by its path.
    async fn find_user_link(&self, symlink_path: &str) -> Result<Option<UserLinkRow>>;

    /// All user links, for the repair sweeps.
    async fn list_user_links(&self) -> Result<Vec<UserLinkRow>>;

    /// Delete a user link row by path. Returns the number of rows removed.
    async fn delete_user_link(&self, symlink_path: &str) -> Result<u64>;

    /// Delete the pool rows (links first, then entries) tracked for a video
    /// id whose pool file disappeared. Returns removed entry count.
    async fn delete_rows_for_video_id(&self, video_id: &str) -> Result<u64>;

    /// Record a failed size check against a pool entry.
    async fn bump_corruption_check(&self, file_hash: &str) -> Result<()>;

    /// Whether dedup (symlink) mode is enabled for a user. Defaults to true.
    async fn dedup_enabled(&self, user_chat_id: i64) -> Result<bool>;
}

/// SQLx implementation of [`StorageRepository`].
pub struct SqlxStorageRepository {
    pool: SqlitePool,
}

impl SqlxStorageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for SqlxStorageRepository {
    async fn insert_pool_entry(&self, entry: &NewPoolEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO file_storage (
                file_hash_sha1, physical_path, file_size_bytes, file_extension,
                youtube_url, title, is_protected
            ) VALUES (?, ?, ?, ?, ?, ?, TRUE)
            "#,
        )
        .bind(&entry.file_hash_sha1)
        .bind(&entry.physical_path)
        .bind(entry.file_size_bytes)
        .bind(&entry.file_extension)
        .bind(&entry.youtube_url)
        .bind(&entry.title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_pool_entry(&self, file_hash: &str) -> Result<Option<PoolEntryRow>> {
        let entry = sqlx::query_as::<_, PoolEntryRow>(
            "SELECT * FROM file_storage WHERE file_hash_sha1 = ?",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn find_pool_entry_by_video_id(&self, video_id: &str) -> Result<Option<PoolEntryRow>> {
        let entry = sqlx::query_as::<_, PoolEntryRow>(
            "SELECT * FROM file_storage WHERE youtube_url LIKE ? LIMIT 1",
        )
        .bind(format!("%{video_id}%"))
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn upgrade_youtube_url(&self, file_hash: &str, youtube_url: &str) -> Result<()> {
        sqlx::query(
            "UPDATE file_storage SET youtube_url = ? WHERE file_hash_sha1 = ? AND youtube_url != ?",
        )
        .bind(youtube_url)
        .bind(file_hash)
        .bind(youtube_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_pool_entry(&self, file_hash: &str) -> Result<()> {
        sqlx::query(
            "UPDATE file_storage SET access_count = access_count + 1, last_accessed_at = ? WHERE file_hash_sha1 = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(file_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_user_link(
        &self,
        user_chat_id: i64,
        file_hash: &str,
        symlink_path: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO user_symlinks
                (user_chat_id, file_hash_sha1, symlink_path, is_protected, created_at)
            VALUES (?, ?, ?, FALSE, ?)
            "#,
        )
        .bind(user_chat_id)
        .bind(file_hash)
        .bind(symlink_path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_user_link(&self, symlink_path: &str) -> Result<Option<UserLinkRow>> {
        let link =
            sqlx::query_as::<_, UserLinkRow>("SELECT * FROM user_symlinks WHERE symlink_path = ?")
                .bind(symlink_path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(link)
    }

    async fn list_user_links(&self) -> Result<Vec<UserLinkRow>> {
        let links = sqlx::query_as::<_, UserLinkRow>("SELECT * FROM user_symlinks")
            .fetch_all(&self.pool)
            .await?;
        Ok(links)
    }

    async fn delete_user_link(&self, symlink_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_symlinks WHERE symlink_path = ?")
            .bind(symlink_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_rows_for_video_id(&self, video_id: &str) -> Result<u64> {
        let pattern = format!("%{video_id}%");
        sqlx::query(
            r#"
            DELETE FROM user_symlinks WHERE file_hash_sha1 IN
                (SELECT file_hash_sha1 FROM file_storage WHERE youtube_url LIKE ?)
            "#,
        )
        .bind(&pattern)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query("DELETE FROM file_storage WHERE youtube_url LIKE ?")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn bump_corruption_check(&self, file_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dedup_file_metadata (file_hash_sha1, corruption_checks, last_checked_at)
            VALUES (?, 1, ?)
            ON CONFLICT(file_hash_sha1) DO UPDATE SET
                corruption_checks = corruption_checks + 1,
                last_checked_at = excluded.last_checked_at
            "#,
        )
        .bind(file_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dedup_enabled(&self, user_chat_id: i64) -> Result<bool> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT dedup_enabled FROM dedup_user_preferences WHERE chat_id = ?")
                .bind(user_chat_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(enabled.unwrap_or(true))
    }
}
