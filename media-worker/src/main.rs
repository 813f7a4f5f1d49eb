//! Worker entry point: wire services, start the repair loop, run the IPC
//! loop until the parent closes stdin.

use std::sync::Arc;

use media_worker::config::WorkerConfig;
use media_worker::context::WorkerContext;
use media_worker::handlers;
use media_worker::ipc;
use media_worker::logging::init_logging;
use media_worker::storage::RepairService;
use media_worker::storage::repair::DEFAULT_REPAIR_INTERVAL;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        download_dir = %config.download_dir.display(),
        database = config.database_url,
        search_cache = config.enable_search_cache,
        mproto = config.mproto_enabled,
        "media worker starting"
    );

    let ctx = WorkerContext::initialize(config).await?;
    ctx.cookies.verify_on_startup();

    // Background reconciliation, independent of requests.
    let cancel = CancellationToken::new();
    let repair = Arc::new(RepairService::new(
        &ctx.config.download_dir,
        ctx.storage.clone(),
        ctx.storage_repo.clone(),
        DEFAULT_REPAIR_INTERVAL,
    ));
    repair.spawn(cancel.clone());

    // Protocol loop: stdout writer + stdin reader. EOF ends the loop.
    let (ipc_sender, writer) = ipc::spawn_writer();
    info!("IPC listener started (reading from stdin)");

    let loop_ctx = ctx.clone();
    let dispatch_sender = ipc_sender.clone();
    ipc::run_loop(tokio::io::stdin(), ipc_sender, move |request| {
        handlers::dispatch(loop_ctx.clone(), dispatch_sender.clone(), request);
    })
    .await;

    // Stop background work; the writer drains once the last in-flight
    // handler drops its sender.
    cancel.cancel();
    let sent = writer.await.unwrap_or(0);

    info!(responses = sent, "worker shutdown complete");
    Ok(())
}
