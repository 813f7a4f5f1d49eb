//! YouTube search handler with result caching.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use ytdlp_driver::runner::run_capture_json;

use crate::context::WorkerContext;
use crate::ipc::{IpcSender, Request};
use crate::utils::url as url_util;
use crate::{Error, Result};

/// Search result cap, regardless of what the request asks for.
const MAX_RESULTS: u64 = 20;

/// Maximum accepted query length.
const MAX_QUERY_LENGTH: usize = 100;

/// Handle the `youtube_search` action.
pub async fn handle_youtube_search(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();

    let query = request
        .param_str("query")
        .ok_or_else(|| Error::validation("Missing 'query' parameter"))?;
    if !url_util::validate_search_query(&query, MAX_QUERY_LENGTH) {
        return Err(Error::validation(
            "Invalid search query (too long or contains invalid characters)",
        ));
    }

    let limit = request.param_u64("limit").unwrap_or(5).clamp(1, MAX_RESULTS);

    info!(task_id, query, limit, "searching");
    let mut progress = ipc.progress_for(&task_id);
    progress.emit_status(0, "searching");

    // Cache first: a hit answers without any child process.
    if let Some(cached) = ctx.cache.get_search(&query).await? {
        let results = truncate_results(cached, limit as usize);
        progress.emit_status(100, "completed");
        ipc.send(
            &task_id,
            "search_results",
            json!({
                "results": results,
                "query": query,
                "total_results": results_len(&results),
                "from_cache": true,
            }),
        );
        return Ok(());
    }

    let invocation = ctx
        .invocation(format!("ytsearch{limit}:{query}"))
        .dump_single_json()
        .flat_playlist();

    let data = run_capture_json(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.metadata_run_options(),
    )
    .await?;

    let results = format_entries(&data, limit as usize);
    info!(task_id, count = results_len(&results), "search finished");

    if let Err(e) = ctx.cache.set_search(&query, &results).await {
        warn!(query, error = %e, "failed to cache search results");
    }

    ipc.send(
        &task_id,
        "search_results",
        json!({
            "results": results,
            "query": query,
            "total_results": results_len(&results),
            "from_cache": false,
        }),
    );
    Ok(())
}

fn results_len(results: &Value) -> usize {
    results.as_array().map(Vec::len).unwrap_or(0)
}

fn truncate_results(results: Value, limit: usize) -> Value {
    match results {
        Value::Array(mut entries) => {
            entries.truncate(limit);
            Value::Array(entries)
        }
        other => other,
    }
}

/// Thumbnail fallback derived from the video id.
fn thumbnail_url(video_id: &str) -> String {
    format!("https://img.youtube.com/vi/{video_id}/mqdefault.jpg")
}

/// Reformat flat-playlist entries into the result shape the parent expects.
fn format_entries(data: &Value, limit: usize) -> Value {
    let entries = data
        .get("entries")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let results: Vec<Value> = entries
        .iter()
        .filter_map(|entry| {
            let video_id = entry.get("id").and_then(Value::as_str)?;
            if video_id.is_empty() {
                return None;
            }
            let thumbnail = entry
                .get("thumbnail")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| thumbnail_url(video_id));
            Some(json!({
                "videoId": video_id,
                "title": entry.get("title").and_then(Value::as_str).unwrap_or("Untitled"),
                "artist": entry.get("uploader").and_then(Value::as_str).unwrap_or("Unknown"),
                "duration": entry.get("duration_string").and_then(Value::as_str).unwrap_or("Unknown"),
                "thumbnail": thumbnail,
                "url": format!("https://www.youtube.com/watch?v={video_id}"),
            }))
        })
        .take(limit)
        .collect();

    Value::Array(results)
}
