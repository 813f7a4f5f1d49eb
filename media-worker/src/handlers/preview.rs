//! Playlist preview: first N track titles without downloading anything.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;
use ytdlp_driver::{DriverError, runner::run_capture};

use crate::context::WorkerContext;
use crate::error::ErrorCode;
use crate::ipc::{IpcSender, Request};
use crate::utils::url as url_util;
use crate::{Error, Result};

const DEFAULT_PREVIEW_COUNT: u64 = 5;

/// Handle the `playlist_preview` action.
pub async fn handle_playlist_preview(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();
    let raw_url = request
        .url()
        .ok_or_else(|| Error::validation("Missing 'url' parameter"))?;
    let url = url_util::normalize_playlist_url(&raw_url);
    let preview_count = request
        .param_u64("preview_count")
        .unwrap_or(DEFAULT_PREVIEW_COUNT)
        .clamp(1, 50) as u32;

    info!(task_id, url, preview_count, "fetching playlist preview");

    let invocation = ctx
        .invocation(&url)
        .flat_playlist()
        .with_playlist_end(preview_count)
        .with_print("%(playlist_title)s|%(playlist_count)s")
        .with_print("%(playlist_index)s\t%(title)s");

    let output = match run_capture(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.metadata_run_options(),
    )
    .await
    {
        Ok(output) => output,
        Err(DriverError::Failed { message, .. }) => {
            ipc.send_error(&task_id, &message, ErrorCode::PlaylistError);
            return Ok(());
        }
        Err(other) => return Err(other.into()),
    };

    let preview = parse_preview_output(&output.stdout);
    ipc.send(&task_id, "done", preview);
    Ok(())
}

/// Parse the interleaved `--print` output.
///
/// Every entry prints both templates, so `title|count` lines repeat; the
/// first one wins. Track lines are `index\ttitle`.
fn parse_preview_output(stdout: &str) -> Value {
    let mut playlist_title = "Playlist".to_string();
    let mut playlist_count = 0u64;
    let mut seen_header = false;
    let mut tracks = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((index, title)) = line.split_once('\t') {
            if let Ok(index) = index.parse::<u64>() {
                tracks.push(json!({ "index": index, "title": title }));
            }
            continue;
        }

        if !seen_header && line.contains('|') {
            let (title, count) = line.rsplit_once('|').unwrap_or((line, ""));
            if !title.is_empty() && title != "NA" {
                playlist_title = title.to_string();
            }
            playlist_count = match count.trim() {
                "" | "NA" => 0,
                n => n.parse().unwrap_or(0),
            };
            seen_header = true;
        }
    }

    json!({
        "playlist_title": playlist_title,
        "playlist_count": playlist_count,
        "tracks": tracks,
    })
}
