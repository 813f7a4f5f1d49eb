//! Line-delimited JSON IPC over stdin/stdout.
//!
//! The parent writes one request object per line on stdin and reads
//! `{task_id, event, data}` frames from stdout. A single writer task owns
//! stdout; handlers talk to it through a cheap clonable [`IpcSender`].
//! All diagnostics go to stderr via tracing so stdout stays protocol-clean.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorCode, classify_error};

/// Task id used for frames that cannot be attributed to a request.
pub const UNKNOWN_TASK_ID: &str = "unknown";

fn default_task_id() -> String {
    UNKNOWN_TASK_ID.to_string()
}

/// One request line from the parent. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default = "default_task_id")]
    pub task_id: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub user_chat_id: Option<i64>,
}

impl Request {
    /// String parameter from `params`, trimmed; `None` when absent/empty.
    pub fn param_str(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// URL field, trimmed; `None` when absent or empty.
    pub fn url(&self) -> Option<String> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

/// One response frame to the parent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    pub task_id: String,
    pub event: String,
    pub data: Value,
}

/// Handle for emitting response frames; clone freely into handler tasks.
#[derive(Debug, Clone)]
pub struct IpcSender {
    tx: mpsc::UnboundedSender<Response>,
}

impl IpcSender {
    /// Send an arbitrary event frame.
    pub fn send(&self, task_id: &str, event: &str, data: Value) {
        let frame = Response {
            task_id: task_id.to_string(),
            event: event.to_string(),
            data,
        };
        if self.tx.send(frame).is_err() {
            warn!("response channel closed; frame dropped");
        }
    }

    /// Send a progress frame with a clamped percentage.
    pub fn send_progress(&self, task_id: &str, percent: u8, speed: &str, eta: u32, status: &str) {
        self.send(
            task_id,
            "progress",
            serde_json::json!({
                "percent": percent.min(100),
                "speed": speed,
                "eta": eta,
                "status": status,
            }),
        );
    }

    /// Send the terminal error frame for a task.
    pub fn send_error(&self, task_id: &str, message: &str, code: ErrorCode) {
        warn!(task_id, code = code.as_str(), message, "error response sent");
        self.send(
            task_id,
            "error",
            serde_json::json!({
                "message": message,
                "error_code": code.as_str(),
                "category": code.category(),
                "retriable": code.retriable(),
            }),
        );
    }

    /// Per-task progress emitter enforcing monotone percentages.
    pub fn progress_for(&self, task_id: &str) -> TaskProgress {
        TaskProgress {
            ipc: self.clone(),
            task_id: task_id.to_string(),
            last_percent: 0,
        }
    }
}

/// Progress emitter for one task.
///
/// Percentages never go backwards: the extractor restarts its counter for
/// secondary streams (audio after video) but the parent sees one job.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    ipc: IpcSender,
    task_id: String,
    last_percent: u8,
}

impl TaskProgress {
    pub fn emit(&mut self, percent: u8, speed: &str, eta: u32, status: &str) {
        let percent = percent.max(self.last_percent).min(100);
        self.last_percent = percent;
        self.ipc.send_progress(&self.task_id, percent, speed, eta, status);
    }

    pub fn emit_status(&mut self, percent: u8, status: &str) {
        self.emit(percent, "", 0, status);
    }
}

/// Create a sender backed by a bare channel.
///
/// The embedding (or a test) decides what consumes the frames; the worker
/// binary uses [`spawn_writer`] instead.
pub fn channel_pair() -> (IpcSender, mpsc::UnboundedReceiver<Response>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IpcSender { tx }, rx)
}

/// Spawn the stdout writer task. Frames sent on the returned sender are
/// serialized one-per-line in order.
pub fn spawn_writer() -> (IpcSender, tokio::task::JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Response>();

    let handle = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut sent = 0u64;

        while let Some(frame) = rx.recv().await {
            let mut line = match serde_json::to_vec(&frame) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to serialize response frame");
                    continue;
                }
            };
            line.push(b'\n');

            if let Err(e) = stdout.write_all(&line).await {
                error!(error = %e, "stdout write failed; stopping writer");
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!(error = %e, "stdout flush failed; stopping writer");
                break;
            }
            sent += 1;
        }
        sent
    });

    (IpcSender { tx }, handle)
}

/// Read requests from `input` until EOF, dispatching each line.
///
/// Handlers run as independent tasks: the next line is read before any
/// in-flight handler finishes. `dispatch` receives every well-formed
/// request; parse failures are answered here.
pub async fn run_loop<R, F>(input: R, ipc: IpcSender, mut dispatch: F)
where
    R: tokio::io::AsyncRead + Unpin,
    F: FnMut(Request),
{
    let mut lines = BufReader::new(input).lines();
    let mut request_count = 0u64;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                request_count += 1;

                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        debug!(
                            task_id = %request.task_id,
                            action = request.action.as_deref().unwrap_or("<missing>"),
                            "request received"
                        );
                        dispatch(request);
                    }
                    Err(e) => {
                        error!(error = %e, "invalid JSON on stdin");
                        ipc.send_error(
                            UNKNOWN_TASK_ID,
                            &format!("Invalid JSON: {e}"),
                            ErrorCode::UnknownError,
                        );
                    }
                }
            }
            Ok(None) => {
                info!(request_count, "stdin closed; shutting down");
                break;
            }
            Err(e) => {
                error!(error = %e, "stdin read failed; shutting down");
                break;
            }
        }
    }
}

/// Report a failed handler as a single terminal error frame.
pub fn report_failure(ipc: &IpcSender, task_id: &str, error: &crate::Error) {
    let (code, message) = classify_error(error);
    error!(task_id, error = %error, "handler failed");
    ipc.send_error(task_id, &message, code);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_sender() -> (IpcSender, mpsc::UnboundedReceiver<Response>) {
        channel_pair()
    }

    #[test]
    fn request_parsing_with_extras_and_defaults() {
        let request: Request = serde_json::from_str(
            r#"{"task_id":"t1","action":"youtube_dl","url":"https://youtu.be/x","params":{"extract_audio":true,"limit":3},"user_chat_id":9,"unknown_field":1}"#,
        )
        .unwrap();

        assert_eq!(request.task_id, "t1");
        assert_eq!(request.action.as_deref(), Some("youtube_dl"));
        assert_eq!(request.url().as_deref(), Some("https://youtu.be/x"));
        assert_eq!(request.param_bool("extract_audio"), Some(true));
        assert_eq!(request.param_u64("limit"), Some(3));
        assert_eq!(request.user_chat_id, Some(9));
    }

    #[test]
    fn request_without_task_id_defaults_to_unknown() {
        let request: Request = serde_json::from_str(r#"{"action":"health_check"}"#).unwrap();
        assert_eq!(request.task_id, UNKNOWN_TASK_ID);
        assert!(request.url().is_none());
        assert!(request.param_str("query").is_none());
    }

    #[test]
    fn progress_is_clamped_and_error_frames_carry_taxonomy() {
        let (ipc, mut rx) = collect_sender();

        ipc.send_progress("t", 150, "1MB/s", 5, "downloading");
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "progress");
        assert_eq!(frame.data["percent"], 100);

        ipc.send_error("t", "boom", ErrorCode::VideoPrivate);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "error");
        assert_eq!(frame.data["error_code"], "VIDEO_PRIVATE");
        assert_eq!(frame.data["retriable"], false);
        assert_eq!(frame.data["category"], "permanent");
    }

    #[test]
    fn task_progress_is_monotone() {
        let (ipc, mut rx) = collect_sender();
        let mut progress = ipc.progress_for("t");

        progress.emit(10, "", 0, "downloading");
        progress.emit(50, "", 0, "downloading");
        // Secondary stream restarting at a lower percent must not regress.
        progress.emit(5, "", 0, "downloading");

        let percents: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|f| f.data["percent"].as_u64().unwrap())
            .collect();
        assert_eq!(percents, [10, 50, 50]);
    }

    #[tokio::test]
    async fn run_loop_dispatches_and_reports_bad_json() {
        let (ipc, mut rx) = collect_sender();
        let input = b"{\"task_id\":\"a\",\"action\":\"health_check\"}\nthis is not json\n\n{\"task_id\":\"b\",\"action\":\"x\"}\n";

        let mut seen = Vec::new();
        run_loop(&input[..], ipc, |request| seen.push(request.task_id)).await;

        // Both well-formed requests dispatched, in order, despite the bad line.
        assert_eq!(seen, ["a", "b"]);

        // Exactly one error frame, addressed to the unknown task.
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.task_id, UNKNOWN_TASK_ID);
        assert_eq!(frame.event, "error");
        assert!(rx.try_recv().is_err());
    }
}
