//! Video metadata handler, backed by the metadata cache.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use ytdlp_driver::runner::run_capture_json;

use crate::context::WorkerContext;
use crate::database::models::MetadataCacheRow;
use crate::ipc::{IpcSender, Request};
use crate::utils::format::format_duration_or_unknown;
use crate::utils::url as url_util;
use crate::{Error, Result};

/// Handle the `get_video_info` action.
pub async fn handle_get_video_info(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();
    let url = request
        .url()
        .ok_or_else(|| Error::validation("Missing 'url' parameter"))?;

    // Cache consult before any extractor launch.
    if let Some(video_id) = url_util::extract_video_id(&url)
        && let Some(cached) = ctx.cache.get_metadata(&video_id).await?
    {
        info!(task_id, video_id, "metadata cache hit");
        ipc.send(&task_id, "video_info", info_payload(&cached, "", true));
        return Ok(());
    }

    info!(task_id, url, "fetching video info");
    let invocation = ctx.invocation(&url).dump_single_json();
    let data = run_capture_json(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.metadata_run_options(),
    )
    .await?;

    let row = row_from_dump(&data);
    let description = data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Err(e) = ctx.cache.set_metadata(&row).await {
        warn!(video_id = row.video_id, error = %e, "failed to cache metadata");
    }

    info!(task_id, title = row.title, "video info retrieved");
    ipc.send(&task_id, "video_info", info_payload(&row, &description, false));
    Ok(())
}

fn row_from_dump(data: &Value) -> MetadataCacheRow {
    MetadataCacheRow {
        video_id: data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        title: data
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
            .to_string(),
        uploader: data
            .get("uploader")
            .and_then(Value::as_str)
            .map(String::from),
        duration_seconds: data.get("duration").and_then(Value::as_i64),
        thumbnail_url: data
            .get("thumbnail")
            .and_then(Value::as_str)
            .map(String::from),
        is_age_restricted: data.get("age_limit").and_then(Value::as_i64).unwrap_or(0) > 0,
        is_private: data
            .get("availability")
            .and_then(Value::as_str)
            .map(|a| a.to_lowercase().contains("private"))
            .unwrap_or(false),
    }
}

fn info_payload(row: &MetadataCacheRow, description: &str, from_cache: bool) -> Value {
    let duration = row.duration_seconds.unwrap_or(0).max(0) as u64;
    json!({
        "videoId": row.video_id,
        "title": row.title,
        "artist": row.uploader.as_deref().unwrap_or("Unknown"),
        "duration": duration,
        "duration_string": format_duration_or_unknown(duration),
        "thumbnail": row.thumbnail_url.as_deref().unwrap_or(""),
        "description": description,
        "is_age_restricted": row.is_age_restricted,
        "is_private": row.is_private,
        "from_cache": from_cache,
    })
}
