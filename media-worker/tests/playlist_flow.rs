//! Playlist flow with a partially valid archive: stale lines are dropped
//! with their rows, cached tracks short-circuit, and only the missing
//! track goes through the extractor.

mod common;

use std::path::PathBuf;

use media_worker::database::repositories::{NewPoolEntry, StorageRepository};
use media_worker::handlers;
use media_worker::ipc::{self, Request};
use media_worker::storage::StoreRequest;

const LIVE_ID: &str = "aaaaaaaaaaa";
const DEAD_ID: &str = "bbbbbbbbbbb";

#[cfg(unix)]
#[tokio::test]
async fn partial_cache_downloads_only_the_missing_track() {
    let dir = tempfile::tempdir().unwrap();

    // Probe calls have --dump-single-json and no -o; batch calls have -o.
    let script = common::write_script(
        dir.path(),
        "fake-ytdlp.sh",
        &format!(
            r#"
prev=""
out=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
if [ -n "$out" ]; then
  d=$(dirname "$out")
  echo "[download] Downloading item 1 of 2" >&2
  echo "[download]  55.0% at 1.00MiB/s" >&2
  printf 'new-track-bytes' > "$d/002 - B.mp3"
  printf 'YTDLP_ID\t{DEAD_ID}\t%s/002 - B.mp3\n' "$d"
  echo "[download] 100% of 3.00MiB in 00:01" >&2
else
  echo '{{"title": "My Playlist", "playlist_count": 2, "entries": [{{"id": "{LIVE_ID}", "title": "A"}}, {{"id": "{DEAD_ID}", "title": "B"}}]}}'
fi
"#
        ),
    );

    let ctx = common::test_context(dir.path(), script.to_str().unwrap()).await;

    // Live cached track: really ingested, pool file exists.
    let source = dir.path().join("stage-a.mp3");
    std::fs::write(&source, b"track-a-bytes").unwrap();
    ctx.storage
        .store_or_link(StoreRequest {
            source_file: source,
            target_path: ctx.config.download_dir.join("7/A.mp3"),
            user_chat_id: 7,
            youtube_url: Some(format!("https://www.youtube.com/watch?v={LIVE_ID}")),
            title: Some("A".to_string()),
            use_symlink: true,
        })
        .await
        .unwrap();

    // Dead track: rows exist but the pool file is gone.
    ctx.storage_repo
        .insert_pool_entry(&NewPoolEntry {
            file_hash_sha1: "deadhash".into(),
            physical_path: dir.path().join("vanished.mp3").to_string_lossy().into_owned(),
            file_size_bytes: 10,
            file_extension: "mp3".into(),
            youtube_url: format!("https://www.youtube.com/watch?v={DEAD_ID}"),
            title: "B".into(),
        })
        .await
        .unwrap();
    ctx.storage_repo
        .record_user_link(7, "deadhash", &dir.path().join("7/B.mp3").to_string_lossy())
        .await
        .unwrap();

    let archive = dir.path().join("archive.txt");
    std::fs::write(&archive, format!("youtube {LIVE_ID}\nyoutube {DEAD_ID}\n")).unwrap();

    let request: Request = serde_json::from_value(serde_json::json!({
        "task_id": "p1",
        "action": "playlist",
        "url": "https://www.youtube.com/playlist?list=PLtest",
        "user_chat_id": 7,
        "params": {
            "extract_audio": true,
            "audio_format": "mp3",
            "playlist_end": 2,
            "archive_file": archive,
            "output_dir": ctx.config.download_dir,
        }
    }))
    .unwrap();

    let (ipc_sender, mut rx) = ipc::channel_pair();
    handlers::dispatch(ctx.clone(), ipc_sender, request);
    let frames = common::collect_until_terminal(&mut rx).await;

    let done = frames.last().unwrap();
    assert_eq!(done.event, "done", "unexpected terminal frame: {done:?}");
    assert_eq!(done.data["playlist_name"], "My Playlist");
    assert_eq!(done.data["already_cached"], 1);
    assert_eq!(done.data["total_tracks_downloaded"], 1);

    let files = done.data["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files.iter().filter(|f| f["cached"] == true).count(), 1);
    assert!(
        done.data["folder_path"]
            .as_str()
            .unwrap()
            .ends_with("My Playlist")
    );

    // (i) the live archive line survived, (ii) the dead one was dropped.
    let archive_content = std::fs::read_to_string(&archive).unwrap();
    assert!(archive_content.contains(LIVE_ID));
    assert!(!archive_content.contains(DEAD_ID));

    // The dead track's orphan rows are gone...
    assert!(
        ctx.storage_repo
            .find_pool_entry("deadhash")
            .await
            .unwrap()
            .is_none()
    );
    // ...and the re-download was ingested under its own video URL.
    let reborn = ctx
        .storage_repo
        .find_pool_entry_by_video_id(DEAD_ID)
        .await
        .unwrap()
        .expect("re-downloaded track not tracked");
    assert!(PathBuf::from(&reborn.physical_path).exists());
}

#[cfg(unix)]
#[tokio::test]
async fn fully_cached_playlist_never_launches_the_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let launches = dir.path().join("launches");

    let script = common::write_script(
        dir.path(),
        "fake-ytdlp.sh",
        &format!(
            r#"
prev=""
out=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
if [ -n "$out" ]; then
  echo batch >> "{launches}"
else
  echo '{{"title": "Cached List", "playlist_count": 1, "entries": [{{"id": "{LIVE_ID}", "title": "A"}}]}}'
fi
"#,
            launches = launches.display()
        ),
    );

    let ctx = common::test_context(dir.path(), script.to_str().unwrap()).await;

    let source = dir.path().join("stage-a.mp3");
    std::fs::write(&source, b"track-a-bytes").unwrap();
    ctx.storage
        .store_or_link(StoreRequest {
            source_file: source,
            target_path: ctx.config.download_dir.join("7/A.mp3"),
            user_chat_id: 7,
            youtube_url: Some(format!("https://www.youtube.com/watch?v={LIVE_ID}")),
            title: Some("A".to_string()),
            use_symlink: true,
        })
        .await
        .unwrap();

    let archive = dir.path().join("archive.txt");
    std::fs::write(&archive, format!("youtube {LIVE_ID}\n")).unwrap();

    let request: Request = serde_json::from_value(serde_json::json!({
        "task_id": "p2",
        "action": "playlist",
        "url": "https://www.youtube.com/playlist?list=PLtest",
        "user_chat_id": 7,
        "params": {
            "extract_audio": true,
            "playlist_end": 1,
            "archive_file": archive,
        }
    }))
    .unwrap();

    let (ipc_sender, mut rx) = ipc::channel_pair();
    handlers::dispatch(ctx, ipc_sender, request);
    let frames = common::collect_until_terminal(&mut rx).await;

    let done = frames.last().unwrap();
    assert_eq!(done.event, "done");
    assert_eq!(done.data["total_tracks_downloaded"], 0);
    assert_eq!(done.data["already_cached"], 1);
    assert_eq!(done.data["files"].as_array().unwrap().len(), 1);

    // No batch launch happened.
    assert!(!launches.exists());
}
