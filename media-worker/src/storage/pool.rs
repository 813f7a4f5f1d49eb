//! Content-addressed storage pool with per-user link views.
//!
//! Layout: `<root>/.storage/tracks/<sha1>/original_file.<ext>` plus a JSON
//! sidecar `metadata.json` per entry for disaster recovery. User-visible
//! paths are relative symlinks into the pool (or full copies for users who
//! opted out of dedup). Pool entries are never deleted here; only
//! administrative action removes pool data.
//!
//! Concurrency: ingests racing on the same content hash serialise on a
//! per-hash async mutex; a loser that finds the pool file already present
//! simply proceeds down the existing-hash branch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::database::models::PoolEntryRow;
use crate::database::repositories::{NewPoolEntry, StorageRepository};
use crate::utils::fs;
use crate::{Error, Result};

/// Pool subdirectory under the download root.
const POOL_SUBDIR: &str = ".storage/tracks";

/// Base name of the pooled artifact; the extension is content-dependent.
const POOL_FILE_STEM: &str = "original_file";

/// Sidecar metadata mirroring the pool row, for disaster recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub size: u64,
    pub hash: String,
    pub extension: String,
    pub youtube_url: String,
    pub title: String,
    pub downloaded_at: String,
    pub access_count: u64,
    pub last_accessed_at: String,
}

/// One ingest request.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Freshly downloaded file to ingest.
    pub source_file: PathBuf,
    /// Where the user expects to see the file.
    pub target_path: PathBuf,
    pub user_chat_id: i64,
    /// Origin URL; specific video URLs upgrade playlist URLs on re-ingest.
    pub youtube_url: Option<String>,
    pub title: Option<String>,
    /// Symlink into the pool (true) or keep a full copy (false).
    pub use_symlink: bool,
}

/// Outcome of a successful ingest.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub final_path: PathBuf,
    pub file_hash: String,
    /// Whether the content was already pooled.
    pub deduplicated: bool,
}

/// The shared content-addressed pool.
pub struct StoragePool {
    pool_dir: PathBuf,
    repo: Arc<dyn StorageRepository>,
    ingest_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StoragePool {
    /// Create a pool rooted at the download directory.
    pub fn new(storage_root: &Path, repo: Arc<dyn StorageRepository>) -> Result<Self> {
        let pool_dir = storage_root.join(POOL_SUBDIR);
        fs::ensure_dir_all_sync(&pool_dir)?;
        info!(pool = %pool_dir.display(), "storage pool initialized");
        Ok(Self {
            pool_dir,
            repo,
            ingest_locks: DashMap::new(),
        })
    }

    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    /// SHA-1 of a file's bytes, computed off the async runtime.
    pub async fn hash_file(path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<String> {
            use std::io::Read;

            let mut file = std::fs::File::open(&path)
                .map_err(|e| Error::io_path("opening file for hashing", &path, e))?;
            let mut hasher = Sha1::new();
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

    /// Locate the pooled artifact for a hash, whatever its extension.
    pub async fn find_pool_file(&self, file_hash: &str) -> Option<PathBuf> {
        let hash_dir = self.pool_dir.join(file_hash);
        let mut entries = tokio::fs::read_dir(&hash_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(POOL_FILE_STEM) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Locate the on-disk pool file tracked for a video id, if any.
    ///
    /// Pre-scan helper: archive lines are only trusted when the pool file
    /// they refer to still exists.
    pub async fn locate_for_video_id(
        &self,
        video_id: &str,
    ) -> Result<Option<(PoolEntryRow, PathBuf)>> {
        let Some(entry) = self.repo.find_pool_entry_by_video_id(video_id).await? else {
            return Ok(None);
        };
        let path = PathBuf::from(&entry.physical_path);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Ok(Some((entry, path)))
        } else {
            Ok(None)
        }
    }

    /// Store a file in the pool or link it against an existing copy.
    pub async fn store_or_link(&self, request: StoreRequest) -> Result<StoredFile> {
        if !tokio::fs::try_exists(&request.source_file).await.unwrap_or(false) {
            return Err(Error::validation(format!(
                "source file does not exist: {}",
                request.source_file.display()
            )));
        }

        let file_hash = Self::hash_file(&request.source_file).await?;
        let file_size = tokio::fs::metadata(&request.source_file)
            .await
            .map_err(|e| Error::io_path("reading metadata", &request.source_file, e))?
            .len();
        let extension = request
            .source_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_lowercase();

        debug!(hash = %file_hash, size = file_size, "ingesting file");

        // Serialise racing ingests of identical content. The map guard is
        // dropped before awaiting the lock.
        let lock = self
            .ingest_locks
            .entry(file_hash.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        let _guard = lock.lock().await;

        if let Some(pool_file) = self.find_pool_file(&file_hash).await {
            self.link_existing(&request, &file_hash, &pool_file).await
        } else {
            self.ingest_new(&request, &file_hash, file_size, &extension)
                .await
        }
    }

    /// Existing-hash branch: drop the duplicate bytes, reference the pool.
    async fn link_existing(
        &self,
        request: &StoreRequest,
        file_hash: &str,
        pool_file: &Path,
    ) -> Result<StoredFile> {
        info!(hash = %file_hash, "file already in pool");

        // Old rows may carry a playlist URL; a specific video URL is better.
        if let Some(url) = request.youtube_url.as_deref()
            && crate::utils::url::is_specific_video_url(url)
        {
            if let Err(e) = self.repo.upgrade_youtube_url(file_hash, url).await {
                debug!(hash = %file_hash, error = %e, "youtube_url upgrade failed");
            }
        }
        if let Err(e) = self.repo.touch_pool_entry(file_hash).await {
            debug!(hash = %file_hash, error = %e, "access-stat update failed");
        }

        // The duplicate bytes are no longer needed (unless source == target
        // and we are about to replace it with a link anyway).
        if request.source_file != request.target_path || request.use_symlink {
            if let Err(e) = tokio::fs::remove_file(&request.source_file).await {
                warn!(path = %request.source_file.display(), error = %e, "failed to remove duplicate source");
            }
        }

        self.materialise_link(request, file_hash, pool_file).await?;

        Ok(StoredFile {
            final_path: request.target_path.clone(),
            file_hash: file_hash.to_string(),
            deduplicated: true,
        })
    }

    /// New-hash branch: move into the pool, write sidecar + row, then link.
    async fn ingest_new(
        &self,
        request: &StoreRequest,
        file_hash: &str,
        file_size: u64,
        extension: &str,
    ) -> Result<StoredFile> {
        info!(hash = %file_hash, "storing new file in pool");

        let hash_dir = self.pool_dir.join(file_hash);
        fs::ensure_dir_all(&hash_dir).await?;
        let pool_file = hash_dir.join(format!("{POOL_FILE_STEM}.{extension}"));

        fs::move_file(&request.source_file, &pool_file).await?;

        let now = chrono::Utc::now().to_rfc3339();
        let metadata = PoolMetadata {
            size: file_size,
            hash: file_hash.to_string(),
            extension: extension.to_string(),
            youtube_url: request.youtube_url.clone().unwrap_or_else(|| "unknown".into()),
            title: request.title.clone().unwrap_or_else(|| "unknown".into()),
            downloaded_at: now.clone(),
            access_count: 1,
            last_accessed_at: now,
        };
        let sidecar = hash_dir.join("metadata.json");
        tokio::fs::write(&sidecar, serde_json::to_vec_pretty(&metadata)?)
            .await
            .map_err(|e| Error::io_path("writing sidecar", &sidecar, e))?;

        self.repo
            .insert_pool_entry(&NewPoolEntry {
                file_hash_sha1: file_hash.to_string(),
                physical_path: pool_file.to_string_lossy().into_owned(),
                file_size_bytes: file_size as i64,
                file_extension: extension.to_string(),
                youtube_url: metadata.youtube_url.clone(),
                title: metadata.title.clone(),
            })
            .await?;

        self.materialise_link(request, file_hash, &pool_file).await?;

        Ok(StoredFile {
            final_path: request.target_path.clone(),
            file_hash: file_hash.to_string(),
            deduplicated: false,
        })
    }

    /// Create the user-visible reference: relative symlink or full copy.
    async fn materialise_link(
        &self,
        request: &StoreRequest,
        file_hash: &str,
        pool_file: &Path,
    ) -> Result<()> {
        fs::ensure_parent_dir(&request.target_path).await?;

        if request.use_symlink {
            create_relative_symlink(pool_file, &request.target_path).await?;
            self.repo
                .record_user_link(
                    request.user_chat_id,
                    file_hash,
                    &request.target_path.to_string_lossy(),
                )
                .await?;
        } else {
            tokio::fs::copy(pool_file, &request.target_path)
                .await
                .map_err(|e| Error::io_path("copying from pool", pool_file, e))?;
        }
        Ok(())
    }

    /// Read an entry's sidecar metadata, if present.
    pub async fn read_sidecar(&self, file_hash: &str) -> Option<PoolMetadata> {
        let sidecar = self.pool_dir.join(file_hash).join("metadata.json");
        let content = tokio::fs::read_to_string(&sidecar).await.ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// Create a relative symlink at `target` pointing to `pool_file`.
///
/// Platforms (or filesystems) without symlink support get a copy instead.
pub async fn create_relative_symlink(pool_file: &Path, target: &Path) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let rel = fs::relative_path(parent, pool_file)?;

    // Replace whatever sits there, including a dangling link.
    if tokio::fs::symlink_metadata(target).await.is_ok()
        && let Err(e) = tokio::fs::remove_file(target).await
    {
        warn!(path = %target.display(), error = %e, "failed to remove existing target");
    }

    #[cfg(unix)]
    {
        tokio::fs::symlink(&rel, target)
            .await
            .map_err(|e| Error::io_path("creating symlink", target, e))?;
        debug!(link = %target.display(), to = %rel.display(), "created symlink");
        Ok(())
    }

    #[cfg(not(unix))]
    {
        // Symlinks need elevated rights on Windows; degrade to a copy.
        let _ = rel;
        tokio::fs::copy(pool_file, target)
            .await
            .map_err(|e| Error::io_path("copying from pool", pool_file, e))?;
        Ok(())
    }
}
