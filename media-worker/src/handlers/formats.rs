//! Format listing: raw extractor formats grouped into selectable tiers.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;
use ytdlp_driver::runner::run_capture_json;

use crate::context::WorkerContext;
use crate::ipc::{IpcSender, Request};
use crate::utils::format::{format_duration_or_unknown, format_filesize};
use crate::{Error, Result};

/// Video quality tiers, highest first. A stream lands in the first tier
/// whose nominal height is within the tolerance.
const VIDEO_TIERS: &[(u64, &str)] = &[
    (2160, "4K (2160p)"),
    (1440, "2K (1440p)"),
    (1080, "Full HD (1080p)"),
    (720, "HD (720p)"),
    (480, "SD (480p)"),
    (360, "360p"),
];

/// Height tolerance when mapping a stream to a tier.
const TIER_TOLERANCE: u64 = 30;

/// MP3 transcode options: (extractor quality knob, bitrate label).
const MP3_OPTIONS: &[(&str, &str)] = &[("0", "320"), ("2", "192"), ("5", "128")];

/// Handle the `get_formats` action.
pub async fn handle_get_formats(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();
    let url = request
        .url()
        .ok_or_else(|| Error::validation("Missing 'url' parameter"))?;
    let mode = request
        .param_str("mode")
        .unwrap_or_else(|| "video".to_string());

    info!(task_id, url, mode, "fetching formats");

    let invocation = ctx.invocation(&url).dump_single_json();
    let data = run_capture_json(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.metadata_run_options(),
    )
    .await?;

    let raw_formats = data
        .get("formats")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let grouped = if mode == "audio" {
        group_audio_formats(&raw_formats)
    } else {
        group_video_formats(&raw_formats)
    };

    let duration = data.get("duration").and_then(Value::as_u64).unwrap_or(0);
    info!(task_id, options = grouped.len(), "format options prepared");

    ipc.send(
        &task_id,
        "format_list",
        json!({
            "title": data.get("title").and_then(Value::as_str).unwrap_or("Untitled"),
            "duration": duration,
            "duration_string": format_duration_or_unknown(duration),
            "thumbnail": data.get("thumbnail").and_then(Value::as_str).unwrap_or(""),
            "mode": mode,
            "formats": grouped,
        }),
    );
    Ok(())
}

fn filesize_of(format: &Value) -> u64 {
    format
        .get("filesize")
        .and_then(Value::as_u64)
        .or_else(|| format.get("filesize_approx").and_then(Value::as_u64))
        .unwrap_or(0)
}

fn str_of<'a>(format: &'a Value, key: &str) -> Option<&'a str> {
    format.get(key).and_then(Value::as_str)
}

/// Group raw formats into video quality tiers.
///
/// Per tier the highest-bitrate stream wins; tiers whose best stream lacks
/// audio get their format id rewritten to `<id>+bestaudio` and are flagged
/// for merging.
fn group_video_formats(raw_formats: &[Value]) -> Vec<Value> {
    struct TierPick {
        format_id: String,
        ext: String,
        filesize: u64,
        height: u64,
        has_audio: bool,
        tbr: f64,
    }

    let mut best_per_tier: Vec<Option<TierPick>> = (0..VIDEO_TIERS.len()).map(|_| None).collect();

    for format in raw_formats {
        let Some(height) = format.get("height").and_then(Value::as_u64) else {
            continue;
        };
        if str_of(format, "vcodec").unwrap_or("none") == "none" {
            continue;
        }

        let Some(tier_index) = VIDEO_TIERS
            .iter()
            .position(|(tier_height, _)| height.abs_diff(*tier_height) <= TIER_TOLERANCE)
        else {
            continue;
        };

        let tbr = format.get("tbr").and_then(Value::as_f64).unwrap_or(0.0);
        let current = &best_per_tier[tier_index];
        if current.as_ref().is_none_or(|pick| tbr > pick.tbr) {
            best_per_tier[tier_index] = Some(TierPick {
                format_id: str_of(format, "format_id").unwrap_or("").to_string(),
                ext: str_of(format, "ext").unwrap_or("mp4").to_string(),
                filesize: filesize_of(format),
                height,
                has_audio: str_of(format, "acodec").unwrap_or("none") != "none",
                tbr,
            });
        }
    }

    best_per_tier
        .into_iter()
        .enumerate()
        .filter_map(|(index, pick)| {
            let pick = pick?;
            let (_, tier_label) = VIDEO_TIERS[index];

            let (format_id, needs_merge) = if pick.has_audio {
                (pick.format_id, false)
            } else {
                (format!("{}+bestaudio", pick.format_id), true)
            };

            let size = format_filesize(pick.filesize);
            let label = if size.is_empty() {
                tier_label.to_string()
            } else {
                format!("{tier_label} ({size})")
            };

            let mut entry = json!({
                "format_id": format_id,
                "label": label,
                "ext": pick.ext,
                "filesize_approx": pick.filesize,
                "type": "video",
                "height": pick.height,
            });
            if needs_merge {
                entry["needs_merge"] = json!(true);
            }
            Some(entry)
        })
        .collect()
}

/// Group raw formats into audio options: one native best-quality entry plus
/// the fixed MP3 transcode ladder.
fn group_audio_formats(raw_formats: &[Value]) -> Vec<Value> {
    let mut best_audio: Option<&Value> = None;
    let mut best_abr = 0.0f64;

    for format in raw_formats {
        if str_of(format, "vcodec").unwrap_or("none") != "none" {
            continue;
        }
        if str_of(format, "acodec").unwrap_or("none") == "none" {
            continue;
        }
        let abr = format
            .get("abr")
            .and_then(Value::as_f64)
            .or_else(|| format.get("tbr").and_then(Value::as_f64))
            .unwrap_or(0.0);
        if abr > best_abr || best_audio.is_none() {
            best_abr = abr;
            best_audio = Some(format);
        }
    }

    let mut result = Vec::new();

    if let Some(format) = best_audio {
        let ext = str_of(format, "ext").unwrap_or("webm");
        let filesize = filesize_of(format);
        let size = format_filesize(filesize);
        let mut label = format!("Best Quality ({}, {}kbps)", ext.to_uppercase(), best_abr as u64);
        if !size.is_empty() {
            label.push_str(&format!(" ({size})"));
        }
        result.push(json!({
            "format_id": str_of(format, "format_id").unwrap_or("bestaudio"),
            "label": label,
            "ext": ext,
            "filesize_approx": filesize,
            "type": "audio",
            "extract_audio": false,
        }));
    }

    for (quality, kbps) in MP3_OPTIONS {
        result.push(json!({
            "format_id": "bestaudio",
            "label": format!("MP3 {kbps}kbps"),
            "ext": "mp3",
            "filesize_approx": 0,
            "type": "audio",
            "extract_audio": true,
            "audio_format": "mp3",
            "audio_quality": quality,
        }));
    }

    result
}
