//! Extractor process supervision.
//!
//! Two run shapes: [`run_capture`] collects both pipes for one-shot metadata
//! extractions, [`run_streaming`] drains stderr through the progress
//! collector and forwards stdout side-channel records live. Both enforce a
//! wall-clock deadline and kill the child on exceedance; the streaming run
//! additionally bounds the gap between consecutive stderr lines so a hung
//! network read cannot stall a job forever.
//!
//! Both pipes are always drained concurrently — reading only one would let
//! the child block on a full pipe buffer.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::DriverError;
use crate::invocation::Invocation;
use crate::progress::{ParserEvent, ProgressCollector};

/// Timeouts for a streaming run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Hard wall-clock limit for the whole run.
    pub overall_timeout: Duration,
    /// Maximum silence between consecutive stderr lines.
    pub line_timeout: Duration,
}

/// Event stream of a [`run_streaming`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Typed stderr event that passed the progress throttle.
    Parser(ParserEvent),
    /// Raw stdout line (side-channel records such as `YTDLP_ID\t…`).
    Sideband(String),
}

/// Result of a completed streaming run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Child exit code (-1 when terminated by signal).
    pub exit_code: i32,
    /// Every non-empty stderr line, for failure classification.
    pub stderr_lines: Vec<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Collected output of a [`run_capture`] call that exited 0.
#[derive(Debug)]
pub struct CaptureOutput {
    pub stdout: String,
    pub stderr: String,
}

fn base_command(binary: &str, invocation: &Invocation) -> Command {
    let mut cmd = Command::new(binary);
    cmd.args(invocation.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run the extractor and collect both pipes under a single deadline.
///
/// Non-zero exit is mapped to [`DriverError::Failed`] carrying the detected
/// failure phrase and the extractor's own last `ERROR:` message.
pub async fn run_capture(
    binary: &str,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<CaptureOutput, DriverError> {
    let child = base_command(binary, invocation)
        .spawn()
        .map_err(|e| DriverError::Spawn {
            binary: binary.to_string(),
            source: e,
        })?;

    debug!(target = invocation.target(), "extractor capture run started");

    // kill_on_drop reaps the child when the timeout drops the future.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| DriverError::Timeout(timeout))??;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let lines: Vec<String> = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let failure = crate::error::classify_stderr(&lines);
        let message = crate::error::last_error_line(&lines)
            .unwrap_or_else(|| format!("extractor failed ({failure})"));
        return Err(DriverError::Failed {
            status: output.status.code().unwrap_or(-1),
            failure,
            message,
        });
    }

    Ok(CaptureOutput { stdout, stderr })
}

/// Run the extractor and parse its stdout as a single JSON document.
pub async fn run_capture_json(
    binary: &str,
    invocation: &Invocation,
    timeout: Duration,
) -> Result<serde_json::Value, DriverError> {
    let output = run_capture(binary, invocation, timeout).await?;
    Ok(serde_json::from_str(&output.stdout)?)
}

/// Run the extractor, streaming events to `events` while both pipes drain.
///
/// The call resolves when the child exits (within the deadline) and returns
/// the exit code plus the collected stderr for classification. The caller
/// receives [`StreamEvent`]s concurrently; dropping the receiver does not
/// abort the run.
pub async fn run_streaming(
    binary: &str,
    invocation: &Invocation,
    opts: RunOptions,
    events: mpsc::Sender<StreamEvent>,
) -> Result<RunOutcome, DriverError> {
    let mut child = base_command(binary, invocation)
        .spawn()
        .map_err(|e| DriverError::Spawn {
            binary: binary.to_string(),
            source: e,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or(DriverError::Pipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(DriverError::Pipe { stream: "stderr" })?;

    debug!(target = invocation.target(), "extractor streaming run started");

    let sideband_tx = events.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if sideband_tx.send(StreamEvent::Sideband(line)).await.is_err() {
                break;
            }
        }
    });

    let line_timeout = opts.line_timeout;
    let stderr_task = tokio::spawn(async move {
        let mut collector = ProgressCollector::new();
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = Vec::new();

        loop {
            let line = match tokio::time::timeout(line_timeout, lines.next_line()).await {
                Err(_) => return Err(DriverError::LineTimeout(line_timeout)),
                Ok(Err(e)) => return Err(DriverError::Io(e)),
                Ok(Ok(None)) => break,
                Ok(Ok(Some(line))) => line.trim().to_string(),
            };
            if line.is_empty() {
                continue;
            }

            debug!("extractor: {line}");
            collected.push(line.clone());

            if let Some(event) = collector.observe(&line) {
                // A dropped receiver is fine; keep draining so the child
                // never blocks on a full pipe.
                let _ = events.send(StreamEvent::Parser(event)).await;
            }
        }

        Ok(collected)
    });

    let deadline = tokio::time::Instant::now() + opts.overall_timeout;

    // Drain both pipes first; the child cannot exit cleanly before EOF.
    let drained = tokio::time::timeout_at(deadline, async {
        let stderr_result = stderr_task.await;
        if matches!(stderr_result, Ok(Ok(_))) {
            let _ = stdout_task.await;
        } else {
            // stderr reader bailed early; the child is about to be killed,
            // so don't wait on a stdout pipe it still holds open.
            stdout_task.abort();
        }
        stderr_result
    })
    .await;

    let stderr_lines = match drained {
        Err(_) => {
            warn!("extractor exceeded overall deadline; killing child");
            let _ = child.kill().await;
            return Err(DriverError::Timeout(opts.overall_timeout));
        }
        Ok(Err(join_err)) => {
            let _ = child.kill().await;
            return Err(DriverError::Io(std::io::Error::other(join_err)));
        }
        Ok(Ok(Err(driver_err))) => {
            let _ = child.kill().await;
            return Err(driver_err);
        }
        Ok(Ok(Ok(lines))) => lines,
    };

    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Err(_) => {
            let _ = child.kill().await;
            return Err(DriverError::Timeout(opts.overall_timeout));
        }
        Ok(status) => status?,
    };

    Ok(RunOutcome {
        exit_code: status.code().unwrap_or(-1),
        stderr_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStatus;

    // The streaming tests drive the runner against shell-script stand-ins
    // for the extractor: real pipes, no network. The invocation target lands
    // in argv[1] and is ignored by the scripts.
    #[cfg(unix)]
    async fn run_script(script: &str, opts: RunOptions) -> (Result<RunOutcome, DriverError>, Vec<StreamEvent>) {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ytdlp.sh");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, "{script}").unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let inv = Invocation::new("ignored-target");
        let (tx, mut rx) = mpsc::channel(64);
        let run = run_streaming(path.to_str().unwrap(), &inv, opts, tx);

        let collect = async {
            let mut events = Vec::new();
            while let Some(ev) = rx.recv().await {
                events.push(ev);
            }
            events
        };

        let (outcome, events) = tokio::join!(run, collect);
        (outcome, events)
    }

    fn quick_opts() -> RunOptions {
        RunOptions {
            overall_timeout: Duration::from_secs(10),
            line_timeout: Duration::from_secs(5),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_progress_and_sideband() {
        let script = r#"
echo "[download]  50.0% of 4MiB at 1MiB/s ETA 0:02" >&2
echo "[download] Destination: /tmp/out.mp3" >&2
printf 'YTDLP_ID\tabc12345678\t/tmp/out.mp3\n'
"#;
        let (outcome, events) = run_script(script, quick_opts()).await;

        let outcome = outcome.unwrap();
        assert!(outcome.success());
        assert!(outcome
            .stderr_lines
            .iter()
            .any(|l| l.contains("Destination")));

        let mut saw_progress = false;
        let mut saw_destination = false;
        let mut saw_sideband = false;
        for event in events {
            match event {
                StreamEvent::Parser(ParserEvent::Progress(p)) => {
                    assert_eq!(p.percent, 50);
                    assert_eq!(p.status, ProgressStatus::Downloading);
                    saw_progress = true;
                }
                StreamEvent::Parser(ParserEvent::Destination(path)) => {
                    assert_eq!(path, "/tmp/out.mp3");
                    saw_destination = true;
                }
                StreamEvent::Sideband(line) => {
                    assert!(line.starts_with("YTDLP_ID\t"));
                    saw_sideband = true;
                }
                _ => {}
            }
        }
        assert!(saw_progress && saw_destination && saw_sideband);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let script = r#"
echo "ERROR: Video unavailable" >&2
exit 1
"#;
        let (outcome, _) = run_script(script, quick_opts()).await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stderr_lines.iter().any(|l| l.contains("ERROR")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_child_hits_line_timeout() {
        let script = "sleep 30";
        let opts = RunOptions {
            overall_timeout: Duration::from_secs(20),
            line_timeout: Duration::from_millis(200),
        };
        let (outcome, _) = run_script(script, opts).await;
        assert!(matches!(outcome, Err(DriverError::LineTimeout(_))));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let inv = Invocation::new("url");
        let (tx, _rx) = mpsc::channel(8);
        let result = run_streaming("/nonexistent/definitely-missing", &inv, quick_opts(), tx).await;
        assert!(matches!(result, Err(DriverError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_collects_stdout_json() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-json.sh");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, r#"echo '{{"title": "ok", "entries": []}}'"#).unwrap();
        }
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let inv = Invocation::new("ignored");
        let value = run_capture_json(path.to_str().unwrap(), &inv, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(value["title"], "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn capture_failure_carries_last_error_message() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-fail.sh");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, r#"echo "ERROR: Private video" >&2"#).unwrap();
            writeln!(f, "exit 1").unwrap();
        }
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let inv = Invocation::new("ignored");
        let err = run_capture(path.to_str().unwrap(), &inv, Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            DriverError::Failed {
                status,
                failure,
                message,
            } => {
                assert_eq!(status, 1);
                assert_eq!(failure, crate::error::DetectedFailure::PrivateVideo);
                assert_eq!(message, "Private video");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
