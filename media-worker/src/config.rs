//! Worker configuration from environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::utils::fs;

/// Typed view over the worker's environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Netscape-format cookie file uploaded by the parent.
    pub cookies_file: PathBuf,
    /// Inline cookie content fallback (written to a temp file when set).
    pub inline_cookies: Option<String>,
    /// Size cap for the preferred best-audio selection, in MB.
    pub best_audio_limit_mb: u32,
    /// Node binary for extractor JS challenges; auto-detected when unset.
    pub node_bin: Option<String>,
    /// Extractor binary.
    pub ytdlp_bin: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Deadline for metadata extractions and per-line reads.
    pub yt_timeout: Duration,
    /// Overall deadline for download jobs.
    pub ipc_timeout: Duration,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub enable_search_cache: bool,
    pub cache_expiry_hours: i64,
    pub log_level: String,
    /// Optional log file; stderr is always logged to.
    pub log_file: Option<PathBuf>,
    pub archive_max_size_mb: u64,
    pub playlist_name_max_length: usize,
    pub rate_limit_searches_per_hour: u32,
    pub database_url: String,
    /// Whether the large-file upload handler is registered.
    pub mproto_enabled: bool,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cookies_file: PathBuf::from("./cookies.txt"),
            inline_cookies: None,
            best_audio_limit_mb: 15,
            node_bin: None,
            ytdlp_bin: "yt-dlp".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            yt_timeout: Duration::from_secs(300),
            ipc_timeout: Duration::from_secs(600),
            download_dir: PathBuf::from("./downloads"),
            temp_dir: PathBuf::from("./temp"),
            enable_search_cache: true,
            cache_expiry_hours: 24,
            log_level: "info".to_string(),
            log_file: None,
            archive_max_size_mb: 100,
            playlist_name_max_length: 100,
            rate_limit_searches_per_hour: 60,
            database_url: "sqlite:./hermes.db?mode=rwc".to_string(),
            mproto_enabled: false,
        }
    }
}

impl WorkerConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cookies_file: PathBuf::from(env_or("YOUTUBE_COOKIE_FILE", "./cookies.txt")),
            inline_cookies: std::env::var("YTDLP_COOKIES").ok().filter(|v| !v.is_empty()),
            best_audio_limit_mb: env_parse("BEST_AUDIO_LIMIT_MB", defaults.best_audio_limit_mb),
            node_bin: std::env::var("NODE_BIN")
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(find_node_binary),
            ytdlp_bin: env_or("YTDLP_BIN", "yt-dlp"),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_secs(env_parse("RETRY_DELAY_SECONDS", 5)),
            yt_timeout: Duration::from_secs(env_parse("YT_TIMEOUT", 300)),
            ipc_timeout: Duration::from_secs(env_parse("IPC_TIMEOUT", 600)),
            download_dir: PathBuf::from(env_or("DOWNLOAD_DIR", "./downloads")),
            temp_dir: PathBuf::from(env_or("TEMP_DIR", "./temp")),
            enable_search_cache: env_bool("ENABLE_SEARCH_CACHE", true),
            cache_expiry_hours: env_parse("CACHE_EXPIRY_HOURS", defaults.cache_expiry_hours),
            log_level: env_or("LOG_LEVEL", "info").to_lowercase(),
            log_file: std::env::var("WORKER_LOG_FILE").ok().map(PathBuf::from),
            archive_max_size_mb: env_parse("ARCHIVE_MAX_SIZE_MB", defaults.archive_max_size_mb),
            playlist_name_max_length: env_parse(
                "PLAYLIST_NAME_MAX_LENGTH",
                defaults.playlist_name_max_length,
            ),
            rate_limit_searches_per_hour: env_parse(
                "RATE_LIMIT_SEARCHES_PER_HOUR",
                defaults.rate_limit_searches_per_hour,
            ),
            database_url: env_or("DATABASE_URL", &defaults.database_url),
            mproto_enabled: env_bool("MPROTO", false),
        }
    }

    /// Create the directories the worker writes into.
    pub fn prepare_directories(&self) -> Result<()> {
        fs::ensure_dir_all_sync(&self.download_dir)?;
        fs::ensure_dir_all_sync(&self.temp_dir)?;
        Ok(())
    }

    /// Config summary for the health check response.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "cookies_file": self.cookies_file,
            "best_audio_limit_mb": self.best_audio_limit_mb,
            "max_retries": self.max_retries,
            "yt_timeout": self.yt_timeout.as_secs(),
            "download_dir": self.download_dir,
            "enable_search_cache": self.enable_search_cache,
            "archive_max_size_mb": self.archive_max_size_mb,
        })
    }
}

/// Locate a `node` binary on PATH for extractor JS challenges.
fn find_node_binary() -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in ["node", "node.exe"] {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                debug!(path = %candidate.display(), "node binary detected");
                return Some(candidate.to_string_lossy().into_owned());
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
