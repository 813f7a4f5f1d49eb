//! Worker context: every shared service, constructed once at startup.
//!
//! Handlers receive an `Arc<WorkerContext>` instead of reaching for
//! globals; the context owns the database pool, caches, cookie store and
//! storage pool, all of which are internally concurrency-safe.

use std::sync::Arc;

use ytdlp_driver::{Invocation, RunOptions};

use crate::Result;
use crate::cache::CacheService;
use crate::config::WorkerConfig;
use crate::cookies::CookieStore;
use crate::database::repositories::{SqlxStorageRepository, StorageRepository};
use crate::database::{self, DbPool};
use crate::storage::StoragePool;
use crate::upload::UploadTransport;

/// Shared state for all request handlers.
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub db: DbPool,
    pub cache: CacheService,
    pub cookies: CookieStore,
    pub storage_repo: Arc<dyn StorageRepository>,
    pub storage: Arc<StoragePool>,
    /// Present only when the large-file upload transport is configured.
    pub upload_transport: Option<Arc<dyn UploadTransport>>,
}

impl WorkerContext {
    /// Connect the database, run migrations and wire up all services.
    pub async fn initialize(config: WorkerConfig) -> Result<Arc<Self>> {
        config.prepare_directories()?;

        let db = database::init_pool(&config.database_url).await?;
        database::migrations::run_migrations(&db).await?;

        let cache = CacheService::new(
            db.clone(),
            config.enable_search_cache,
            config.cache_expiry_hours,
        );
        let cookies = CookieStore::new(&config);
        let storage_repo: Arc<dyn StorageRepository> =
            Arc::new(SqlxStorageRepository::new(db.clone()));
        let storage = Arc::new(StoragePool::new(&config.download_dir, storage_repo.clone())?);

        Ok(Arc::new(Self {
            config,
            db,
            cache,
            cookies,
            storage_repo,
            storage,
            upload_transport: None,
        }))
    }

    /// Attach the large-file upload transport.
    ///
    /// The transport lives in the embedding (the worker crate only defines
    /// the seam), so it is wired after construction, before any requests
    /// are dispatched. Fails once the context has been shared.
    pub fn attach_upload_transport(
        ctx: &mut Arc<Self>,
        transport: Arc<dyn UploadTransport>,
    ) -> bool {
        match Arc::get_mut(ctx) {
            Some(inner) => {
                inner.upload_transport = Some(transport);
                true
            }
            None => false,
        }
    }

    /// Base extractor invocation with the ambient policy applied: cookie
    /// file (which also selects the player client) and the JS runtime.
    pub fn invocation(&self, target: impl Into<String>) -> Invocation {
        Invocation::new(target)
            .with_cookies(self.cookies.resolve())
            .with_js_runtime(self.config.node_bin.clone())
    }

    /// Timeouts for one-shot metadata extractions.
    pub fn metadata_run_options(&self) -> std::time::Duration {
        self.config.yt_timeout
    }

    /// Timeouts for streaming download runs.
    pub fn download_run_options(&self) -> RunOptions {
        RunOptions {
            overall_timeout: self.config.ipc_timeout,
            line_timeout: self.config.yt_timeout,
        }
    }
}
