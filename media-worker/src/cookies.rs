//! Cookie store: locates the authentication cookie file for child processes.
//!
//! The parent process owns the master cookie file and rewrites it through a
//! separate channel; the worker reads it directly — no working copy — so an
//! update takes effect on the very next child launch. The extractor's
//! in-place session-cookie refreshes are accepted as-is. When no file
//! exists, inline content from `YTDLP_COOKIES` is materialised under the
//! temp directory with owner-only permissions.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::WorkerConfig;

const INLINE_COOKIE_FILENAME: &str = "yt_cookies_reusable.txt";

/// Resolves the cookie file handed to extractor invocations.
#[derive(Debug, Clone)]
pub struct CookieStore {
    master_file: PathBuf,
    inline_fallback: Option<String>,
    temp_dir: PathBuf,
}

impl CookieStore {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            master_file: config.cookies_file.clone(),
            inline_fallback: config.inline_cookies.clone(),
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Resolve the cookie file path, if any source is available.
    ///
    /// Checked on every call so parent-side uploads are picked up without a
    /// restart.
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.master_file.exists() {
            return Some(self.master_file.clone());
        }

        let content = self.inline_fallback.as_ref()?;
        let fallback = self.temp_dir.join(INLINE_COOKIE_FILENAME);
        if let Err(e) = write_private(&fallback, content) {
            warn!(path = %fallback.display(), error = %e, "failed to write inline cookie file");
            return None;
        }
        Some(fallback)
    }

    /// Whether the resolved file plausibly contains YouTube cookies.
    pub fn validate(&self) -> bool {
        let Some(path) = self.resolve() else {
            return false;
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                !content.trim().is_empty()
                    && (content.contains("youtube.com") || content.contains(".google.com"))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cookie validation read failed");
                false
            }
        }
    }

    /// Startup verification with detailed logging; never fatal.
    pub fn verify_on_startup(&self) {
        let Some(path) = self.resolve() else {
            warn!(
                checked = %self.master_file.display(),
                "no cookie file found; downloads may fail for restricted content"
            );
            return;
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let lines = content.lines().count();
                info!(
                    path = %path.display(),
                    size = content.len(),
                    lines,
                    "cookie file verified"
                );
                if !self.validate() {
                    warn!("no YouTube/Google domains found in cookie file");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "cookie verification error"),
        }
    }
}

fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(master: PathBuf, inline: Option<String>, temp: PathBuf) -> CookieStore {
        CookieStore {
            master_file: master,
            inline_fallback: inline,
            temp_dir: temp,
        }
    }

    #[test]
    fn resolves_master_file_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("cookies.txt");
        std::fs::write(&master, "# Netscape HTTP Cookie File\n.youtube.com\tTRUE\n").unwrap();

        let store = store(master.clone(), None, dir.path().to_path_buf());
        assert_eq!(store.resolve(), Some(master));
        assert!(store.validate());
    }

    #[test]
    fn falls_back_to_inline_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(
            dir.path().join("missing.txt"),
            Some(".google.com\tTRUE\t/\n".to_string()),
            dir.path().to_path_buf(),
        );

        let resolved = store.resolve().unwrap();
        assert!(resolved.ends_with(INLINE_COOKIE_FILENAME));
        assert!(store.validate());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&resolved).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn nothing_available_resolves_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path().join("missing.txt"), None, dir.path().to_path_buf());
        assert_eq!(store.resolve(), None);
        assert!(!store.validate());
    }

    #[test]
    fn rejects_cookie_file_without_known_domains() {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("cookies.txt");
        std::fs::write(&master, "some unrelated content").unwrap();

        let store = store(master, None, dir.path().to_path_buf());
        assert!(!store.validate());
    }
}
