//! Search-result, video-metadata and upload caches.
//!
//! All three are expiry-driven tables in the shared database. Reads ignore
//! expired rows; `cleanup` removes them. The search cache key is the MD5 of
//! the lowercased query so arbitrarily long queries stay indexable.

use chrono::{Duration as ChronoDuration, Utc};
use md5::{Digest, Md5};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::models::{MetadataCacheRow, UploadCacheRow};

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn expiry_rfc3339(ttl_hours: i64) -> String {
    (Utc::now() + ChronoDuration::hours(ttl_hours)).to_rfc3339()
}

/// Cache key for a search query.
fn hash_query(query: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(query.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Expiry-driven caches over the shared database.
#[derive(Clone)]
pub struct CacheService {
    pool: SqlitePool,
    /// Gates cache *writes* only; reads are always attempted (and cannot
    /// hit when nothing is ever written).
    search_cache_enabled: bool,
    ttl_hours: i64,
}

impl CacheService {
    pub fn new(pool: SqlitePool, search_cache_enabled: bool, ttl_hours: i64) -> Self {
        Self {
            pool,
            search_cache_enabled,
            ttl_hours,
        }
    }

    // ----- search cache -----

    /// Get cached search results for a query, bumping access stats on hit.
    pub async fn get_search(&self, query: &str) -> Result<Option<Value>> {
        let query_hash = hash_query(query);

        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT results_json FROM search_cache
            WHERE query_hash = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(&query_hash)
        .bind(now_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        let Some((results_json,)) = row else {
            debug!(query, "search cache miss");
            return Ok(None);
        };

        sqlx::query(
            "UPDATE search_cache SET access_count = access_count + 1, last_accessed = ? WHERE query_hash = ?",
        )
        .bind(now_rfc3339())
        .bind(&query_hash)
        .execute(&self.pool)
        .await?;

        match serde_json::from_str(&results_json) {
            Ok(value) => {
                debug!(query, "search cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(query, error = %e, "discarding undecodable cached results");
                Ok(None)
            }
        }
    }

    /// Cache search results. A no-op when the search cache is disabled.
    pub async fn set_search(&self, query: &str, results: &Value) -> Result<()> {
        if !self.search_cache_enabled {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO search_cache (query, query_hash, results_json, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(query)
        .bind(hash_query(query))
        .bind(serde_json::to_string(results)?)
        .bind(expiry_rfc3339(self.ttl_hours))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- metadata cache -----

    /// Get cached video metadata, bumping access stats on hit.
    pub async fn get_metadata(&self, video_id: &str) -> Result<Option<MetadataCacheRow>> {
        let row = sqlx::query_as::<_, MetadataCacheRow>(
            r#"
            SELECT video_id, title, uploader, duration_seconds, thumbnail_url,
                   is_age_restricted, is_private
            FROM youtube_metadata_cache
            WHERE video_id = ? AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(video_id)
        .bind(now_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        if row.is_some() {
            sqlx::query(
                "UPDATE youtube_metadata_cache SET access_count = access_count + 1, last_accessed = ? WHERE video_id = ?",
            )
            .bind(now_rfc3339())
            .bind(video_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(row)
    }

    /// Cache video metadata with the configured TTL.
    pub async fn set_metadata(&self, row: &MetadataCacheRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO youtube_metadata_cache
                (video_id, title, uploader, duration_seconds, thumbnail_url,
                 is_age_restricted, is_playlist, is_private, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, FALSE, ?, ?)
            "#,
        )
        .bind(&row.video_id)
        .bind(&row.title)
        .bind(&row.uploader)
        .bind(row.duration_seconds)
        .bind(&row.thumbnail_url)
        .bind(row.is_age_restricted)
        .bind(row.is_private)
        .bind(expiry_rfc3339(self.ttl_hours))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- upload cache -----

    /// Look up a previously uploaded file by content hash.
    pub async fn get_upload(&self, file_hash_sha256: &str) -> Result<Option<UploadCacheRow>> {
        let row = sqlx::query_as::<_, UploadCacheRow>(
            "SELECT file_hash_sha256, file_path, channel_msg_id, file_size_bytes FROM file_cache WHERE file_hash_sha256 = ?",
        )
        .bind(file_hash_sha256)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Record an uploaded file's channel message id.
    pub async fn set_upload(
        &self,
        file_hash_sha256: &str,
        file_path: &str,
        channel_msg_id: i64,
        file_size_bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO file_cache
                (file_hash_sha256, file_path, channel_msg_id, file_size_bytes, cached_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_hash_sha256)
        .bind(file_path)
        .bind(channel_msg_id)
        .bind(file_size_bytes)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ----- maintenance -----

    /// Delete expired rows from both expiry-driven caches.
    pub async fn cleanup(&self) -> Result<u64> {
        let now = now_rfc3339();

        let metadata = sqlx::query(
            "DELETE FROM youtube_metadata_cache WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let search =
            sqlx::query("DELETE FROM search_cache WHERE expires_at IS NOT NULL AND expires_at < ?")
                .bind(&now)
                .execute(&self.pool)
                .await?
                .rows_affected();

        let total = metadata + search;
        if total > 0 {
            info!(metadata, search, "cache cleanup removed expired entries");
        }
        Ok(total)
    }

    /// Entry counts and settings for the `cache_stats` action.
    pub async fn stats(&self) -> Result<Value> {
        let metadata_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM youtube_metadata_cache")
            .fetch_one(&self.pool)
            .await?;
        let search_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_cache")
            .fetch_one(&self.pool)
            .await?;

        Ok(serde_json::json!({
            "metadata_entries": metadata_entries,
            "search_entries": search_entries,
            "cache_enabled": self.search_cache_enabled,
            "ttl_hours": self.ttl_hours,
        }))
    }
}
