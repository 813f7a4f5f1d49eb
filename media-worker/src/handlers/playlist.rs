//! Playlist batch-download handler.
//!
//! The flow: normalise the URL, probe playlist metadata, reconcile the
//! download archive against the pool (dropping lines whose pool file is
//! gone), collect cached hits, short-circuit when everything is already on
//! disk, otherwise run one batch extractor child and ingest every new file
//! into the pool under its own video URL.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use ytdlp_driver::{DriverError, Invocation, ParserEvent, StreamEvent, run_streaming};

use crate::context::WorkerContext;
use crate::database::repositories::StorageRepository;
use crate::error::ErrorCode;
use crate::ipc::{IpcSender, Request, TaskProgress};
use crate::storage::StoreRequest;
use crate::utils::filename::sanitize_folder_name;
use crate::utils::fs;
use crate::utils::url as url_util;
use crate::{Error, Result};

/// Audio format fallback chain for playlist batches.
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio[ext=webm]/bestaudio/best";

/// Video format fallback chain for playlist batches.
const VIDEO_FORMAT: &str = "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]\
/bestvideo[height<=1080]+bestaudio/best[height<=1080]/best";

/// Default track cap: Radio Mixes are endless.
const DEFAULT_PLAYLIST_END: u32 = 50;

/// Prefix of per-track identity records on the child's stdout.
const ID_RECORD_PREFIX: &str = "YTDLP_ID\t";

/// Playlist metadata from the flat probe.
#[derive(Debug, Clone)]
struct PlaylistInfo {
    title: String,
    total_tracks: usize,
    entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone)]
struct PlaylistEntry {
    id: String,
    title: String,
}

/// Handle the `playlist` action.
pub async fn handle_playlist_download(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();

    let raw_url = request
        .url()
        .ok_or_else(|| Error::validation("Missing 'url' parameter"))?;
    let url = url_util::normalize_playlist_url(&raw_url);
    if url != raw_url {
        info!(task_id, url, "normalized playlist URL");
    }

    info!(task_id, url, "starting playlist download");
    let mut progress = ipc.progress_for(&task_id);
    progress.emit_status(0, "preparing");

    let info = match probe_playlist(&ctx, &url).await {
        Ok(info) => info,
        Err(Error::Driver(DriverError::Failed { message, .. })) => {
            ipc.send_error(&task_id, &message, ErrorCode::PlaylistError);
            return Ok(());
        }
        Err(other) => return Err(other),
    };

    info!(
        task_id,
        playlist = info.title,
        tracks = info.total_tracks,
        entries = info.entries.len(),
        "playlist probed"
    );

    let playlist_end = request
        .param_u64("playlist_end")
        .map(|v| v as usize)
        .filter(|v| *v > 0);
    let archive_path = request.param_str("archive_file").map(PathBuf::from);

    // Reconcile the archive before trusting it: lines whose tracked pool
    // file vanished are dropped along with their orphan rows.
    if let Some(ref archive) = archive_path
        && tokio::fs::try_exists(archive).await.unwrap_or(false)
    {
        let removed = validate_archive(&ctx, archive, &task_id).await?;
        if removed > 0 {
            info!(task_id, removed, "stale archive entries removed");
        }
    }

    // Pre-scan: collect pool files for archived entries; entries the pool
    // cannot produce get dropped from the archive for re-download.
    let scan_limit = playlist_end.unwrap_or(info.entries.len());
    let scan_entries = &info.entries[..info.entries.len().min(scan_limit)];

    let mut skipped = 0usize;
    let mut cached_files: Vec<(PathBuf, String)> = Vec::new();

    if let Some(ref archive) = archive_path
        && !scan_entries.is_empty()
    {
        let archived_ids = read_archive_ids(archive).await;
        let mut unfindable: HashSet<String> = HashSet::new();

        for entry in scan_entries {
            if !archived_ids.contains(&entry.id) {
                continue;
            }
            skipped += 1;
            match ctx.storage.locate_for_video_id(&entry.id).await? {
                Some((row, path)) => {
                    debug!(task_id, video_id = entry.id, path = %path.display(), "cached track found");
                    let title = row.title.filter(|t| t != "unknown").unwrap_or_else(|| entry.title.clone());
                    cached_files.push((path, title));
                }
                None => {
                    info!(task_id, video_id = entry.id, "archived track unfindable; will re-download");
                    unfindable.insert(entry.id.clone());
                }
            }
        }

        if !unfindable.is_empty() {
            skipped -= unfindable.len();
            prune_archive_ids(archive, &unfindable).await?;
        }

        if skipped > 0 {
            info!(task_id, skipped, cached = cached_files.len(), "pre-scan summary");
            progress.emit_status(5, &format!("pre_scan:{skipped}_cached"));
        }
    }

    // Short-circuit: everything requested is already cached and findable.
    let effective = playlist_end
        .map(|end| info.entries.len().min(end))
        .unwrap_or(info.entries.len());
    if !info.entries.is_empty() && skipped >= effective && cached_files.len() >= effective {
        info!(task_id, cached = cached_files.len(), "all tracks cached; skipping extractor");
        let files = describe_cached_files(&cached_files).await;
        ipc.send(
            &task_id,
            "done",
            json!({
                "playlist_name": info.title,
                "total_tracks_downloaded": 0,
                "already_cached": skipped,
                "files": files,
                "folder_path": "",
            }),
        );
        return Ok(());
    }

    // Output folder named after the playlist.
    let folder_name = sanitize_folder_name(&info.title, ctx.config.playlist_name_max_length);
    let base_dir = request
        .param_str("output_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.config.download_dir.clone());
    let output_dir = base_dir.join(&folder_name);
    fs::ensure_dir_all(&output_dir).await?;

    let downloaded = download_tracks(
        &ctx,
        &request,
        &url,
        &output_dir,
        archive_path.as_deref(),
        info.total_tracks,
        &mut progress,
    )
    .await?;

    let cached_count = cached_files.len();
    let new_count = downloaded.len();
    if cached_count == 0 && new_count == 0 {
        ipc.send_error(
            &task_id,
            "No tracks were downloaded and no cached files found",
            ErrorCode::UnknownError,
        );
        return Ok(());
    }

    info!(task_id, cached = cached_count, new = new_count, "assembling response");
    progress.emit_status(95, "finalizing");

    let mut files = describe_cached_files(&cached_files).await;
    for path in &downloaded {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            warn!(task_id, path = %path.display(), "downloaded file missing; skipping");
            continue;
        };
        files.push(json!({
            "path": path,
            "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            "size_mb": size_mb(meta.len()),
            "cached": false,
        }));
    }

    let cached_in_response = files.iter().filter(|f| f["cached"] == true).count();
    progress.emit_status(100, "completed");

    ipc.send(
        &task_id,
        "done",
        json!({
            "playlist_name": info.title,
            "total_tracks_downloaded": new_count,
            "already_cached": cached_in_response,
            "files": files,
            "folder_path": output_dir,
        }),
    );
    Ok(())
}

/// Flat metadata probe via `--dump-single-json --flat-playlist`.
async fn probe_playlist(ctx: &WorkerContext, url: &str) -> Result<PlaylistInfo> {
    let invocation = ctx
        .invocation(url)
        .yes_playlist()
        .dump_single_json()
        .flat_playlist();

    let data = ytdlp_driver::runner::run_capture_json(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.metadata_run_options(),
    )
    .await?;

    Ok(parse_playlist_info(&data))
}

fn parse_playlist_info(data: &Value) -> PlaylistInfo {
    let entries: Vec<PlaylistEntry> = data
        .get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let id = entry.get("id").and_then(Value::as_str)?;
                    Some(PlaylistEntry {
                        id: id.to_string(),
                        title: entry
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let total_tracks = data
        .get("playlist_count")
        .and_then(Value::as_u64)
        .map(|c| c as usize)
        .filter(|c| *c > 0)
        .unwrap_or(entries.len());

    PlaylistInfo {
        title: data
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or("Playlist")
            .to_string(),
        total_tracks,
        entries,
    }
}

/// Launch the batch child and ingest each resulting file into the pool.
async fn download_tracks(
    ctx: &WorkerContext,
    request: &Request,
    url: &str,
    output_dir: &Path,
    archive_path: Option<&Path>,
    total_tracks: usize,
    progress: &mut TaskProgress,
) -> Result<Vec<PathBuf>> {
    let task_id = &request.task_id;
    let extract_audio = request.param_bool("extract_audio").unwrap_or(false);
    let playlist_end = request
        .param_u64("playlist_end")
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_PLAYLIST_END);

    let format_chain = request.param_str("format").unwrap_or_else(|| {
        if extract_audio {
            AUDIO_FORMAT.to_string()
        } else {
            VIDEO_FORMAT.to_string()
        }
    });

    // Radio Mixes have no playlist index to template on.
    let template = if url_util::is_radio_mix(url) {
        output_dir.join("%(title)s.%(ext)s")
    } else {
        output_dir.join("%(playlist_index)03d - %(title)s.%(ext)s")
    };

    let mut invocation: Invocation = ctx
        .invocation(url)
        .yes_playlist()
        .ignore_errors()
        .with_socket_timeout(10)
        .with_playlist_end(playlist_end)
        .with_format_chain(format_chain)
        .with_output_template(template.to_string_lossy().into_owned())
        .with_print(format!("after_move:{ID_RECORD_PREFIX}%(id)s\t%(filepath)s"))
        .with_progress_template("[download] %(progress._percent_str)s at %(progress._speed_str)s");

    if extract_audio {
        let audio_format = request
            .param_str("audio_format")
            .unwrap_or_else(|| "mp3".to_string());
        invocation = invocation.with_audio_extract(ytdlp_driver::AudioExtract {
            format: audio_format,
            quality: Some("0".to_string()),
        });
    }

    if let Some(archive) = archive_path {
        fs::ensure_parent_dir(archive).await?;
        invocation = invocation.with_download_archive(archive);
        info!(task_id, archive = %archive.display(), "using download archive");
    }

    let (event_tx, mut event_rx) = mpsc::channel(64);
    let run = run_streaming(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.download_run_options(),
        event_tx,
    );

    // Identity records from stdout are consumed while stderr drains.
    let mut path_to_video_id: HashMap<PathBuf, String> = HashMap::new();
    let mut current_track = 0usize;
    let consume = async {
        while let Some(event) = event_rx.recv().await {
            match event {
                StreamEvent::Sideband(line) => {
                    if let Some((video_id, path)) = parse_id_record(&line) {
                        debug!(task_id, video_id, path = %path.display(), "track identity mapped");
                        path_to_video_id.insert(path, video_id);
                    }
                }
                StreamEvent::Parser(ParserEvent::PlaylistItem { index, .. }) => {
                    current_track = index as usize;
                }
                StreamEvent::Parser(ParserEvent::Progress(_))
                | StreamEvent::Parser(ParserEvent::Completed(_)) => {
                    let overall =
                        (current_track as f64 / total_tracks.max(1) as f64 * 100.0) as u8;
                    progress.emit(overall, "", 0, "downloading_playlist");
                }
                StreamEvent::Parser(ParserEvent::Error(line)) => {
                    warn!(task_id, line, "extractor error line");
                }
                StreamEvent::Parser(_) => {}
            }
        }
    };

    let (outcome, ()) = tokio::join!(run, consume);
    let outcome = outcome?;
    if !outcome.success() {
        // Batch runs tolerate per-item failures (--ignore-errors); whatever
        // landed on disk still counts.
        warn!(task_id, code = outcome.exit_code, "batch extractor exited non-zero");
    }

    let downloaded = fs::list_media_files(output_dir).await?;

    // Route everything through the pool with per-track URLs.
    let Some(user_chat_id) = request.user_chat_id else {
        return Ok(downloaded);
    };
    let use_symlink = ctx.storage_repo.dedup_enabled(user_chat_id).await?;

    let mut final_paths = Vec::with_capacity(downloaded.len());
    for file in downloaded {
        let track_url = video_url_for(&file, &path_to_video_id).unwrap_or_else(|| url.to_string());
        let title = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());

        match ctx
            .storage
            .store_or_link(StoreRequest {
                source_file: file.clone(),
                target_path: file.clone(),
                user_chat_id,
                youtube_url: Some(track_url),
                title,
                use_symlink,
            })
            .await
        {
            Ok(stored) => final_paths.push(stored.final_path),
            Err(e) => {
                warn!(task_id, file = %file.display(), error = %e, "pool ingest failed; keeping original");
                final_paths.push(file);
            }
        }
    }

    final_paths.sort();
    Ok(final_paths)
}

/// Parse one `YTDLP_ID\t<id>\t<filepath>` stdout record.
fn parse_id_record(line: &str) -> Option<(String, PathBuf)> {
    let rest = line.strip_prefix(ID_RECORD_PREFIX)?;
    let (video_id, path) = rest.split_once('\t')?;
    if video_id.is_empty() || path.is_empty() {
        return None;
    }
    Some((video_id.to_string(), PathBuf::from(path)))
}

/// Find the specific video URL for a downloaded file, matching the exact
/// path first and the basename as a fallback (the extractor sometimes
/// reports a slightly different path than the final one).
fn video_url_for(file: &Path, map: &HashMap<PathBuf, String>) -> Option<String> {
    let id = map.get(file).or_else(|| {
        let basename = file.file_name()?;
        map.iter()
            .find(|(path, _)| path.file_name() == Some(basename))
            .map(|(_, id)| id)
    })?;
    Some(format!("https://www.youtube.com/watch?v={id}"))
}

/// Validate the archive against the pool: a line whose tracked pool file no
/// longer exists is dropped and its orphan rows deleted; lines without a
/// database match are kept (they cannot be verified).
async fn validate_archive(ctx: &WorkerContext, archive: &Path, task_id: &str) -> Result<u64> {
    let content = tokio::fs::read_to_string(archive)
        .await
        .map_err(|e| Error::io_path("reading archive", archive, e))?;

    let mut kept: Vec<&str> = Vec::new();
    let mut removed = 0u64;

    for line in content.lines() {
        let Some(video_id) = archive_line_video_id(line) else {
            kept.push(line);
            continue;
        };

        match ctx.storage_repo.find_pool_entry_by_video_id(video_id).await? {
            Some(entry) => {
                let physical = PathBuf::from(&entry.physical_path);
                if tokio::fs::try_exists(&physical).await.unwrap_or(false) {
                    kept.push(line);
                } else {
                    removed += 1;
                    info!(task_id, video_id, "stale archive entry (pool file gone)");
                    ctx.storage_repo.delete_rows_for_video_id(video_id).await?;
                }
            }
            // No database match: playlist-era rows may carry the playlist
            // URL, so absence proves nothing. Keep the line.
            None => kept.push(line),
        }
    }

    if removed > 0 {
        rewrite_archive(archive, &kept).await?;
    }
    Ok(removed)
}

/// Video id of an archive line (`"youtube <id>"`), if well-formed.
fn archive_line_video_id(line: &str) -> Option<&str> {
    let mut parts = line.split_whitespace();
    let _extractor = parts.next()?;
    parts.next()
}

/// Read the set of archived video ids.
async fn read_archive_ids(archive: &Path) -> HashSet<String> {
    match tokio::fs::read_to_string(archive).await {
        Ok(content) => content
            .lines()
            .filter_map(archive_line_video_id)
            .map(String::from)
            .collect(),
        Err(e) => {
            warn!(archive = %archive.display(), error = %e, "could not read archive");
            HashSet::new()
        }
    }
}

/// Drop the given ids from the archive so the extractor re-downloads them.
async fn prune_archive_ids(archive: &Path, ids: &HashSet<String>) -> Result<u64> {
    let content = tokio::fs::read_to_string(archive)
        .await
        .map_err(|e| Error::io_path("reading archive", archive, e))?;

    let mut kept: Vec<&str> = Vec::new();
    let mut dropped = 0u64;
    for line in content.lines() {
        match archive_line_video_id(line) {
            Some(id) if ids.contains(id) => dropped += 1,
            _ => kept.push(line),
        }
    }

    if dropped > 0 {
        rewrite_archive(archive, &kept).await?;
    }
    Ok(dropped)
}

async fn rewrite_archive(archive: &Path, lines: &[&str]) -> Result<()> {
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    tokio::fs::write(archive, content)
        .await
        .map_err(|e| Error::io_path("writing archive", archive, e))
}

/// Build response entries for cached pool files, skipping vanished ones.
async fn describe_cached_files(cached: &[(PathBuf, String)]) -> Vec<Value> {
    let mut files = Vec::new();
    for (path, title) in cached {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            warn!(path = %path.display(), "cached file missing; skipping");
            continue;
        };
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".mp3".to_string());
        let name = if title.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            format!("{title}{ext}")
        };
        files.push(json!({
            "path": path,
            "name": name,
            "size_mb": size_mb(meta.len()),
            "cached": true,
        }));
    }
    files
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
