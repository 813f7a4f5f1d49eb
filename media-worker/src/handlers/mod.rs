//! Request handlers and the action dispatch table.

pub mod admin;
pub mod download;
pub mod formats;
pub mod info;
pub mod playlist;
pub mod preview;
pub mod search;
pub mod upload;

use std::sync::Arc;

use crate::context::WorkerContext;
use crate::error::ErrorCode;
use crate::ipc::{self, IpcSender, Request};

/// Dispatch one request onto its handler as an independent task.
///
/// The caller returns to reading stdin immediately. Every spawned handler
/// terminates the task with exactly one `done`/`error` (or handler-specific
/// terminal) frame: handlers emit success frames themselves and surface
/// failures as `Err`, which is reported here.
pub fn dispatch(ctx: Arc<WorkerContext>, ipc: IpcSender, request: Request) {
    tokio::spawn(async move {
        let task_id = request.task_id.clone();

        let Some(action) = request.action.clone() else {
            ipc.send_error(
                &task_id,
                "Missing 'action' field in request",
                ErrorCode::UnknownError,
            );
            return;
        };

        let result = match action.as_str() {
            "youtube_dl" => download::handle_youtube_download(ctx, ipc.clone(), request).await,
            "playlist" => playlist::handle_playlist_download(ctx, ipc.clone(), request).await,
            "youtube_search" => search::handle_youtube_search(ctx, ipc.clone(), request).await,
            "get_video_info" => info::handle_get_video_info(ctx, ipc.clone(), request).await,
            "get_formats" => formats::handle_get_formats(ctx, ipc.clone(), request).await,
            "playlist_preview" => preview::handle_playlist_preview(ctx, ipc.clone(), request).await,
            "cache_cleanup" => admin::handle_cache_cleanup(ctx, ipc.clone(), request).await,
            "cache_stats" => admin::handle_cache_stats(ctx, ipc.clone(), request).await,
            "health_check" => admin::handle_health_check(ctx, ipc.clone(), request).await,
            "mtproto_upload" if ctx.config.mproto_enabled => {
                upload::handle_mtproto_upload(ctx, ipc.clone(), request).await
            }
            other => {
                ipc.send_error(
                    &task_id,
                    &format!("Unknown action: {other}"),
                    ErrorCode::UnknownError,
                );
                return;
            }
        };

        if let Err(e) = result {
            ipc::report_failure(&ipc, &task_id, &e);
        }
    });
}
