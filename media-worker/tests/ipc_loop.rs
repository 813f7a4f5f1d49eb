//! IPC loop behaviour: malformed lines, unknown actions and admin flows
//! end-to-end through the dispatch table.

mod common;

use std::time::Duration;

use media_worker::handlers;
use media_worker::ipc::{self, Request};

#[tokio::test]
async fn malformed_line_gets_one_error_and_the_loop_continues() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::test_context(dir.path(), "/nonexistent/ytdlp").await;
    let (ipc_sender, mut rx) = ipc::channel_pair();

    let input = b"this is not json\n{\"task_id\":\"h1\",\"action\":\"health_check\"}\n";

    let loop_ctx = ctx.clone();
    let dispatch_sender = ipc_sender.clone();
    ipc::run_loop(&input[..], ipc_sender, move |request| {
        handlers::dispatch(loop_ctx.clone(), dispatch_sender.clone(), request);
    })
    .await;

    // First frame: the malformed-line error, addressed to "unknown".
    let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.task_id, "unknown");
    assert_eq!(first.event, "error");

    // The subsequent request is still served.
    let second = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.task_id, "h1");
    assert_eq!(second.event, "health_ok");
    assert!(
        second.data["handlers"]
            .as_array()
            .unwrap()
            .iter()
            .any(|h| h == "youtube_dl")
    );
}

#[tokio::test]
async fn unknown_and_missing_actions_are_answered() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::test_context(dir.path(), "/nonexistent/ytdlp").await;

    let (ipc_sender, mut rx) = ipc::channel_pair();
    let request: Request =
        serde_json::from_value(serde_json::json!({"task_id": "u1", "action": "frobnicate"}))
            .unwrap();
    handlers::dispatch(ctx.clone(), ipc_sender, request);
    let frames = common::collect_until_terminal(&mut rx).await;
    assert_eq!(frames.last().unwrap().event, "error");
    assert!(
        frames.last().unwrap().data["message"]
            .as_str()
            .unwrap()
            .contains("frobnicate")
    );

    let (ipc_sender, mut rx) = ipc::channel_pair();
    let request: Request = serde_json::from_value(serde_json::json!({"task_id": "u2"})).unwrap();
    handlers::dispatch(ctx, ipc_sender, request);
    let frames = common::collect_until_terminal(&mut rx).await;
    assert_eq!(frames.last().unwrap().event, "error");
    assert!(
        frames.last().unwrap().data["message"]
            .as_str()
            .unwrap()
            .contains("action")
    );
}

#[tokio::test]
async fn upload_action_is_unknown_until_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::test_context(dir.path(), "/nonexistent/ytdlp").await;

    let (ipc_sender, mut rx) = ipc::channel_pair();
    let request: Request = serde_json::from_value(serde_json::json!({
        "task_id": "m1",
        "action": "mtproto_upload",
        "params": {"file_path": "/tmp/x.mp3"}
    }))
    .unwrap();

    handlers::dispatch(ctx, ipc_sender, request);
    let frames = common::collect_until_terminal(&mut rx).await;
    let error = frames.last().unwrap();
    assert_eq!(error.event, "error");
    assert!(error.data["message"].as_str().unwrap().contains("Unknown action"));
}

#[tokio::test]
async fn cache_admin_actions_respond() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::test_context(dir.path(), "/nonexistent/ytdlp").await;

    let (ipc_sender, mut rx) = ipc::channel_pair();
    let request: Request =
        serde_json::from_value(serde_json::json!({"task_id": "c1", "action": "cache_stats"}))
            .unwrap();
    handlers::dispatch(ctx.clone(), ipc_sender, request);
    let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.event, "cache_stats");
    assert_eq!(frame.data["metadata_entries"], 0);

    let (ipc_sender, mut rx) = ipc::channel_pair();
    let request: Request =
        serde_json::from_value(serde_json::json!({"task_id": "c2", "action": "cache_cleanup"}))
            .unwrap();
    handlers::dispatch(ctx, ipc_sender, request);
    let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.event, "cache_cleanup_done");
}
