//! Filesystem helpers shared across modules.
//!
//! Consistent error context (operation + path) and the recurring
//! newest-media-file fallback used when the extractor never announces a
//! destination.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::{Error, Result};

/// Media extensions the worker recognises as downloadable artifacts.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "mp4", "webm", "opus", "ogg", "wav", "flac", "mkv",
];

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Ensure a directory exists (synchronous variant, for startup paths).
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

/// Whether a path names one of the recognised media extensions.
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            let lower = ext.to_lowercase();
            MEDIA_EXTENSIONS.contains(&lower.as_str())
        })
}

/// Find the most recently modified non-empty media file in a directory.
///
/// Fallback used when a download finished but the destination was never
/// announced on stderr.
pub async fn find_newest_media_file(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !is_media_file(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() || meta.len() == 0 {
            continue;
        }
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if newest.as_ref().is_none_or(|(t, _)| mtime > *t) {
            newest = Some((mtime, path));
        }
    }

    newest.map(|(_, path)| path)
}

/// Build a safe output path for a requested filename inside `base_dir`.
///
/// The filename is sanitized and the joined path is checked to still be
/// contained in `base_dir`; `None` means traversal was attempted.
pub fn safe_output_path(base_dir: &Path, filename: &str) -> Option<PathBuf> {
    let safe_name = crate::utils::filename::sanitize_filename(filename);
    let base_abs = std::path::absolute(base_dir).ok()?;
    let full_abs = std::path::absolute(base_abs.join(safe_name)).ok()?;

    full_abs.starts_with(&base_abs).then_some(full_abs)
}

/// Compute a lexical relative path from `from_dir` to `to`.
///
/// Both paths are made absolute first; no symlinks are resolved, which is
/// exactly what link creation wants (the link itself may sit beside other
/// links).
pub fn relative_path(from_dir: &Path, to: &Path) -> Result<PathBuf> {
    let from_abs = std::path::absolute(from_dir).map_err(|e| io_error("resolving path", from_dir, e))?;
    let to_abs = std::path::absolute(to).map_err(|e| io_error("resolving path", to, e))?;

    let from_components: Vec<_> = from_abs.components().collect();
    let to_components: Vec<_> = to_abs.components().collect();

    let common = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in common..from_components.len() {
        result.push("..");
    }
    for component in &to_components[common..] {
        result.push(component);
    }

    if result.as_os_str().is_empty() {
        result.push(".");
    }
    Ok(result)
}

/// Move a file, falling back to copy-and-remove across filesystems.
pub async fn move_file(source: &Path, dest: &Path) -> Result<()> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            // Rename fails across mount points; the pool may live on
            // different storage than the temp download directory.
            tokio::fs::copy(source, dest)
                .await
                .map_err(|e| io_error("copying file", source, e))?;
            tokio::fs::remove_file(source)
                .await
                .map_err(|e| io_error("removing file", source, e))
        }
    }
}

/// List all non-empty media files directly under a directory, sorted by path.
pub async fn list_media_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("reading directory", dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading directory", dir, e))?
    {
        let path = entry.path();
        if !is_media_file(&path) {
            continue;
        }
        if let Ok(meta) = entry.metadata().await
            && meta.is_file()
            && meta.len() > 0
        {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_media_file_skips_empty_and_non_media() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::write(root.join("old.mp3"), b"abc").unwrap();
        std::fs::write(root.join("empty.mp3"), b"").unwrap();
        std::fs::write(root.join("notes.txt"), b"notes").unwrap();
        // Nudge mtime ordering.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        std::fs::write(root.join("new.m4a"), b"abcdef").unwrap();

        let newest = find_newest_media_file(root).await.unwrap();
        assert_eq!(newest.file_name().unwrap(), "new.m4a");
    }

    #[tokio::test]
    async fn newest_media_file_none_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_newest_media_file(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn lists_media_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("b.mp3"), b"x").unwrap();
        std::fs::write(root.join("a.mp4"), b"x").unwrap();
        std::fs::write(root.join("c.txt"), b"x").unwrap();

        let files = list_media_files(root).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.mp4", "b.mp3"]);
    }

    #[test]
    fn safe_output_path_contains_traversal() {
        let base = Path::new("/downloads/7");
        let path = safe_output_path(base, "../../etc/passwd").unwrap();
        assert!(path.starts_with("/downloads/7"));
        assert_eq!(path.file_name().unwrap(), "etcpasswd");

        let plain = safe_output_path(base, "song.mp3").unwrap();
        assert_eq!(plain, Path::new("/downloads/7/song.mp3"));
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        let rel = relative_path(
            Path::new("/downloads/7/task1"),
            Path::new("/downloads/.storage/tracks/abc/original_file.mp3"),
        )
        .unwrap();
        assert_eq!(
            rel,
            Path::new("../../.storage/tracks/abc/original_file.mp3")
        );
    }

    #[test]
    fn relative_path_same_dir() {
        let rel = relative_path(Path::new("/a/b"), Path::new("/a/b/file.mp3")).unwrap();
        assert_eq!(rel, Path::new("file.mp3"));
    }

    #[tokio::test]
    async fn move_file_renames_within_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.mp3");
        let dst = dir.path().join("dst.mp3");
        std::fs::write(&src, b"bytes").unwrap();

        move_file(&src, &dst).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"bytes");
    }

    #[test]
    fn media_extension_check() {
        assert!(is_media_file(Path::new("/x/track.MP3")));
        assert!(is_media_file(Path::new("video.webm")));
        assert!(!is_media_file(Path::new("archive.zip")));
        assert!(!is_media_file(Path::new("noext")));
    }
}
