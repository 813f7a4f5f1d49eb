//! Shared scaffolding for the integration tests: a worker context over a
//! temp directory and fake extractor scripts standing in for yt-dlp.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use media_worker::config::WorkerConfig;
use media_worker::context::WorkerContext;
use media_worker::ipc::Response;
use tokio::sync::mpsc::UnboundedReceiver;

/// Build a context whose directories and database live under `dir` and
/// whose extractor is the given binary (a fake script in these tests).
pub async fn test_context(dir: &Path, ytdlp_bin: &str) -> Arc<WorkerContext> {
    let config = WorkerConfig {
        ytdlp_bin: ytdlp_bin.to_string(),
        download_dir: dir.join("downloads"),
        temp_dir: dir.join("temp"),
        cookies_file: dir.join("cookies.txt"),
        database_url: format!("sqlite:{}?mode=rwc", dir.join("worker.db").display()),
        yt_timeout: Duration::from_secs(20),
        ipc_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    WorkerContext::initialize(config).await.unwrap()
}

/// Write an executable shell script and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Receive frames until a terminal event (`done`/`error`) arrives.
pub async fn collect_until_terminal(rx: &mut UnboundedReceiver<Response>) -> Vec<Response> {
    let mut frames = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for a terminal frame")
            .expect("response channel closed before a terminal frame");
        let terminal = matches!(frame.event.as_str(), "done" | "error");
        frames.push(frame);
        if terminal {
            return frames;
        }
    }
}
