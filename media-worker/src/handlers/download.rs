//! Single-video download handler.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use ytdlp_driver::{AudioExtract, ParserEvent, StreamEvent, classify_stderr, last_error_line, run_streaming};

use crate::context::WorkerContext;
use crate::database::repositories::StorageRepository;
use crate::error::ErrorCode;
use crate::ipc::{IpcSender, Request};
use crate::storage::StoreRequest;
use crate::utils::{fs, url as url_util};
use crate::{Error, Result};

/// Progress template fed to the extractor so stderr lines match the parser.
pub(crate) const PROGRESS_TEMPLATE: &str =
    "[download] %(progress._percent_str)s at %(progress._speed_str)s ETA %(progress._eta_str)s";

/// Handle the `youtube_dl` action.
pub async fn handle_youtube_download(
    ctx: Arc<WorkerContext>,
    ipc: IpcSender,
    request: Request,
) -> Result<()> {
    let task_id = request.task_id.clone();

    let url = request
        .url()
        .ok_or_else(|| Error::validation("Missing 'url' parameter"))?;
    if !url_util::validate_youtube_url(&url) {
        return Err(Error::validation("Invalid YouTube URL provided."));
    }

    info!(task_id, url, "starting download");
    let mut progress = ipc.progress_for(&task_id);
    progress.emit_status(0, "preparing");

    let extract_audio = request.param_bool("extract_audio").unwrap_or(false);

    let mut invocation = ctx
        .invocation(&url)
        .no_check_certificate()
        .with_progress_template(PROGRESS_TEMPLATE);

    if extract_audio {
        let audio_format = request
            .param_str("audio_format")
            .unwrap_or_else(|| "mp3".to_string());
        let audio_quality = request
            .param_str("audio_quality")
            .unwrap_or_else(|| "192".to_string());
        let limit_mb = request
            .param_u64("best_audio_limit_mb")
            .unwrap_or(ctx.config.best_audio_limit_mb as u64);

        let chain = if limit_mb > 0 {
            format!("bestaudio[filesize<{limit_mb}M]/bestaudio")
        } else {
            "bestaudio".to_string()
        };
        invocation = invocation
            .with_format_chain(chain)
            .with_audio_extract(AudioExtract {
                format: audio_format,
                quality: Some(audio_quality),
            });
    } else {
        let chain = request
            .param_str("format")
            .unwrap_or_else(|| "best[ext=mp4]/best".to_string());
        invocation = invocation.with_format_chain(chain);
    }

    let output_dir = request
        .param_str("output_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.config.download_dir.clone());
    fs::ensure_dir_all(&output_dir).await?;
    invocation = invocation.with_output_template(
        output_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned(),
    );

    // Run the extractor, consuming events as both pipes drain.
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let run = run_streaming(
        &ctx.config.ytdlp_bin,
        &invocation,
        ctx.download_run_options(),
        event_tx,
    );

    let mut destination: Option<String> = None;
    let mut error_line: Option<String> = None;
    let consume = async {
        while let Some(event) = event_rx.recv().await {
            match event {
                StreamEvent::Parser(ParserEvent::Progress(p)) => {
                    progress.emit(p.percent, &p.speed, p.eta_seconds, p.status.as_str());
                }
                StreamEvent::Parser(ParserEvent::Destination(path)) => {
                    info!(task_id, path, "destination announced");
                    destination = Some(path);
                }
                StreamEvent::Parser(ParserEvent::AlreadyDownloaded(path)) => {
                    info!(task_id, path, "file already downloaded");
                    destination = Some(path);
                    progress.emit_status(100, "completed");
                }
                StreamEvent::Parser(ParserEvent::Error(line)) => {
                    warn!(task_id, line, "extractor error line");
                    error_line = Some(line);
                }
                StreamEvent::Parser(ParserEvent::Completed(p)) => {
                    progress.emit(100, &p.speed, 0, "completed");
                }
                StreamEvent::Parser(ParserEvent::PlaylistItem { .. })
                | StreamEvent::Sideband(_) => {}
            }
        }
    };

    let (outcome, ()) = tokio::join!(run, consume);
    let outcome = outcome?;

    if !outcome.success() {
        let failure = classify_stderr(&outcome.stderr_lines);
        let message = error_line
            .or_else(|| last_error_line(&outcome.stderr_lines))
            .unwrap_or_else(|| format!("extractor exited with code {}", outcome.exit_code));
        return Err(Error::Driver(ytdlp_driver::DriverError::Failed {
            status: outcome.exit_code,
            failure,
            message,
        }));
    }

    // Resolve the downloaded file: announced destination, else the newest
    // media file in the output directory.
    let file_path = match destination.map(PathBuf::from) {
        Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => Some(path),
        _ => fs::find_newest_media_file(&output_dir).await,
    };

    let Some(file_path) = file_path else {
        ipc.send_error(&task_id, "Downloaded file not found", ErrorCode::FileNotFound);
        return Ok(());
    };

    // Canonicalise into the storage pool; the user path keeps working either
    // way, so ingest failures only cost dedup.
    let file_path = match ingest(&ctx, &request, &url, &file_path).await {
        Ok(path) => path,
        Err(e) => {
            warn!(task_id, error = %e, "pool ingest failed; keeping original file");
            file_path
        }
    };

    let file_size = tokio::fs::metadata(&file_path)
        .await
        .map_err(|e| Error::io_path("reading metadata", &file_path, e))?
        .len();
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!(task_id, file = %file_path.display(), size = file_size, "download completed");
    ipc.send(
        &task_id,
        "done",
        serde_json::json!({
            "file_path": file_path,
            "file_size": file_size,
            "filename": filename,
        }),
    );
    Ok(())
}

/// Store the finished file in the pool under the requesting user.
async fn ingest(
    ctx: &WorkerContext,
    request: &Request,
    url: &str,
    file_path: &PathBuf,
) -> Result<PathBuf> {
    let Some(user_chat_id) = request.user_chat_id else {
        return Ok(file_path.clone());
    };

    let use_symlink = ctx.storage_repo.dedup_enabled(user_chat_id).await?;
    let stored = ctx
        .storage
        .store_or_link(StoreRequest {
            source_file: file_path.clone(),
            target_path: file_path.clone(),
            user_chat_id,
            youtube_url: Some(url.to_string()),
            title: file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            use_symlink,
        })
        .await?;
    Ok(stored.final_path)
}
