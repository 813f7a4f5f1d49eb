//! Search handler: extractor launch counting and cache short-circuit.

mod common;

use media_worker::handlers;
use media_worker::ipc::{self, Request};

fn search_request(task_id: &str) -> Request {
    serde_json::from_value(serde_json::json!({
        "task_id": task_id,
        "action": "youtube_search",
        "params": { "query": "lofi", "limit": 3 }
    }))
    .unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn second_search_is_served_from_cache_without_a_child() {
    let dir = tempfile::tempdir().unwrap();
    let launches = dir.path().join("launches");

    // Every invocation appends a line; the test counts them afterwards.
    let script = common::write_script(
        dir.path(),
        "fake-ytdlp.sh",
        &format!(
            r#"
echo run >> "{launches}"
echo '{{"entries": [{{"id": "aaa", "title": "Lofi One", "uploader": "Chan", "duration_string": "1:00"}}, {{"id": "bbb", "title": "Lofi Two"}}]}}'
"#,
            launches = launches.display()
        ),
    );

    let ctx = common::test_context(dir.path(), script.to_str().unwrap()).await;

    // First search: goes to the extractor.
    let (ipc_sender, mut rx) = ipc::channel_pair();
    handlers::dispatch(ctx.clone(), ipc_sender, search_request("s1"));
    let frame = wait_for_results(&mut rx).await;
    assert_eq!(frame.data["from_cache"], false);
    assert_eq!(frame.data["total_results"], 2);
    assert_eq!(frame.data["results"][0]["videoId"], "aaa");

    // Second search: cache hit, no child process spawned in between.
    let (ipc_sender, mut rx) = ipc::channel_pair();
    handlers::dispatch(ctx, ipc_sender, search_request("s2"));
    let frame = wait_for_results(&mut rx).await;
    assert_eq!(frame.data["from_cache"], true);
    assert_eq!(frame.data["total_results"], 2);

    let launch_count = std::fs::read_to_string(&launches).unwrap().lines().count();
    assert_eq!(launch_count, 1);
}

#[tokio::test]
async fn rejected_queries_never_reach_the_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = common::test_context(dir.path(), "/nonexistent/ytdlp").await;

    for query in ["", "a;rm -rf /", "x|y"] {
        let (ipc_sender, mut rx) = ipc::channel_pair();
        let request: Request = serde_json::from_value(serde_json::json!({
            "task_id": "bad",
            "action": "youtube_search",
            "params": { "query": query }
        }))
        .unwrap();

        handlers::dispatch(ctx.clone(), ipc_sender, request);
        let frames = common::collect_until_terminal(&mut rx).await;
        assert_eq!(frames.last().unwrap().event, "error");
    }
}

async fn wait_for_results(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<ipc::Response>,
) -> ipc::Response {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match frame.event.as_str() {
            "search_results" => return frame,
            "error" => panic!("unexpected error frame: {frame:?}"),
            _ => {}
        }
    }
}
