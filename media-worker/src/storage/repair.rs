//! Background repair service for user links and pool metadata.
//!
//! Loops on a fixed interval reconciling the filesystem with the database:
//! broken links are recreated when the pool still has the bytes, removed
//! (file and row) when it does not; pool files are size-checked against
//! their sidecars; link rows whose path vanished are pruned. Pool entries
//! themselves are never deleted here — that is an administrative action.
//!
//! The service is a weak side-process: a failing cycle is logged and the
//! loop continues.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::repositories::StorageRepository;
use crate::storage::pool::{StoragePool, create_relative_symlink};
use crate::{Error, Result};

/// Default scan interval.
pub const DEFAULT_REPAIR_INTERVAL: Duration = Duration::from_secs(3600);

/// Counters from one repair cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub healthy_links: u64,
    pub repaired_links: u64,
    pub removed_links: u64,
    pub corrupted_entries: u64,
    pub orphan_rows_removed: u64,
}

/// Periodic reconciliation of links, pool files and database rows.
pub struct RepairService {
    storage_root: PathBuf,
    pool: Arc<StoragePool>,
    repo: Arc<dyn StorageRepository>,
    interval: Duration,
}

impl RepairService {
    pub fn new(
        storage_root: &Path,
        pool: Arc<StoragePool>,
        repo: Arc<dyn StorageRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            storage_root: storage_root.to_path_buf(),
            pool,
            repo,
            interval,
        }
    }

    /// Spawn the background loop; cancelling the token stops it.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "repair service started");
        tokio::spawn(async move {
            loop {
                match self.run_cycle().await {
                    Ok(report) => debug!(?report, "repair cycle finished"),
                    Err(e) => error!(error = %e, "repair cycle failed"),
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("repair service shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        })
    }

    /// One full cycle: link scan, corruption scan, orphan cleanup.
    pub async fn run_cycle(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        if let Err(e) = self.scan_and_repair_links(&mut report).await {
            error!(error = %e, "symlink scan failed");
        }
        if let Err(e) = self.detect_corruption(&mut report).await {
            error!(error = %e, "corruption scan failed");
        }
        if let Err(e) = self.cleanup_orphan_rows(&mut report).await {
            error!(error = %e, "orphan cleanup failed");
        }

        if report != RepairReport::default() {
            info!(
                healthy = report.healthy_links,
                repaired = report.repaired_links,
                removed = report.removed_links,
                corrupted = report.corrupted_entries,
                orphans = report.orphan_rows_removed,
                "repair cycle summary"
            );
        }
        Ok(report)
    }

    /// Walk user directories (skipping the pool) and fix every link found.
    async fn scan_and_repair_links(&self, report: &mut RepairReport) -> Result<()> {
        let mut pending = vec![self.storage_root.clone()];

        while let Some(dir) = pending.pop() {
            if dir.file_name().is_some_and(|n| n == ".storage") {
                continue;
            }

            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot read directory");
                    continue;
                }
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(meta) = tokio::fs::symlink_metadata(&path).await else {
                    continue;
                };

                if meta.is_dir() {
                    pending.push(path);
                } else if meta.file_type().is_symlink() {
                    self.check_link(&path, report).await;
                }
            }
        }

        Ok(())
    }

    async fn check_link(&self, link_path: &Path, report: &mut RepairReport) {
        // A resolvable link is healthy.
        if tokio::fs::metadata(link_path).await.is_ok() {
            report.healthy_links += 1;
            return;
        }

        match self.repair_broken_link(link_path).await {
            Ok(true) => {
                report.repaired_links += 1;
                info!(link = %link_path.display(), "repaired symlink");
            }
            Ok(false) => {
                report.removed_links += 1;
                warn!(link = %link_path.display(), "removed broken symlink");
            }
            Err(e) => {
                error!(link = %link_path.display(), error = %e, "link repair failed");
            }
        }
    }

    /// Repair a broken link from the database, or remove it (and its row).
    async fn repair_broken_link(&self, link_path: &Path) -> Result<bool> {
        let link_str = link_path.to_string_lossy();

        if let Some(row) = self.repo.find_user_link(&link_str).await?
            && let Some(entry) = self.repo.find_pool_entry(&row.file_hash_sha1).await?
        {
            let physical = PathBuf::from(&entry.physical_path);
            if tokio::fs::try_exists(&physical).await.unwrap_or(false) {
                create_relative_symlink(&physical, link_path).await?;
                return Ok(true);
            }
        }

        // No recovery possible: drop the row first, then the file.
        self.repo.delete_user_link(&link_str).await?;
        tokio::fs::remove_file(link_path)
            .await
            .map_err(|e| Error::io_path("removing broken symlink", link_path, e))?;
        Ok(false)
    }

    /// Compare every sidecar's recorded size with the on-disk pool file.
    ///
    /// Mismatches are logged and counted against the entry; pool data is
    /// never deleted automatically.
    async fn detect_corruption(&self, report: &mut RepairReport) -> Result<()> {
        let pool_dir = self.pool.pool_dir();
        if !tokio::fs::try_exists(pool_dir).await.unwrap_or(false) {
            return Ok(());
        }

        let mut hash_dirs = tokio::fs::read_dir(pool_dir)
            .await
            .map_err(|e| Error::io_path("reading pool directory", pool_dir, e))?;

        while let Ok(Some(entry)) = hash_dirs.next_entry().await {
            if !entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false) {
                continue;
            }
            let file_hash = entry.file_name().to_string_lossy().into_owned();

            let Some(metadata) = self.pool.read_sidecar(&file_hash).await else {
                debug!(hash = %file_hash, "no sidecar metadata");
                continue;
            };
            let Some(pool_file) = self.pool.find_pool_file(&file_hash).await else {
                continue;
            };
            let Ok(actual_size) = tokio::fs::metadata(&pool_file).await.map(|m| m.len()) else {
                continue;
            };

            if actual_size != metadata.size {
                report.corrupted_entries += 1;
                warn!(
                    file = %pool_file.display(),
                    expected = metadata.size,
                    actual = actual_size,
                    "pool file size mismatch"
                );
                if let Err(e) = self.repo.bump_corruption_check(&file_hash).await {
                    error!(hash = %file_hash, error = %e, "failed to record corruption check");
                }
            }
        }

        Ok(())
    }

    /// Remove link rows whose path no longer exists on disk at all.
    async fn cleanup_orphan_rows(&self, report: &mut RepairReport) -> Result<()> {
        for link in self.repo.list_user_links().await? {
            let path = Path::new(&link.symlink_path);
            // symlink_metadata also sees dangling links; those are handled
            // by the link scan, not here.
            if tokio::fs::symlink_metadata(path).await.is_err() {
                let removed = self.repo.delete_user_link(&link.symlink_path).await?;
                report.orphan_rows_removed += removed;
                debug!(path = %link.symlink_path, "removed orphaned link row");
            }
        }
        Ok(())
    }
}
