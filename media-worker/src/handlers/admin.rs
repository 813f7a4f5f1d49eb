//! Health and cache administration handlers.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::context::WorkerContext;
use crate::ipc::{IpcSender, Request};
use crate::Result;

/// Actions the worker answers, for the health report.
pub fn registered_actions(mproto_enabled: bool) -> Vec<&'static str> {
    let mut actions = vec![
        "youtube_dl",
        "playlist",
        "youtube_search",
        "get_video_info",
        "get_formats",
        "playlist_preview",
        "cache_cleanup",
        "cache_stats",
        "health_check",
    ];
    if mproto_enabled {
        actions.push("mtproto_upload");
    }
    actions
}

/// Handle the `health_check` action.
pub async fn handle_health_check(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    ipc.send(
        &request.task_id,
        "health_ok",
        json!({
            "worker": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "config": ctx.config.summary(),
            "handlers": registered_actions(ctx.config.mproto_enabled),
        }),
    );
    Ok(())
}

/// Handle the `cache_stats` action.
pub async fn handle_cache_stats(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let stats = ctx.cache.stats().await?;
    ipc.send(&request.task_id, "cache_stats", stats);
    Ok(())
}

/// Handle the `cache_cleanup` action.
pub async fn handle_cache_cleanup(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let removed = ctx.cache.cleanup().await?;
    info!(task_id = request.task_id, removed, "cache cleanup finished");
    ipc.send(&request.task_id, "cache_cleanup_done", json!({ "removed": removed }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_action_registered_only_when_enabled() {
        assert!(!registered_actions(false).contains(&"mtproto_upload"));
        assert!(registered_actions(true).contains(&"mtproto_upload"));
        assert!(registered_actions(false).contains(&"health_check"));
    }
}
