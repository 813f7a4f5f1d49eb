//! Application-wide error types and the failure taxonomy reported over IPC.

use std::path::{Path, PathBuf};

use thiserror::Error;
use ytdlp_driver::{DetectedFailure, DriverError};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error while {op} '{path}': {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extractor error: {0}")]
    Driver(#[from] DriverError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Retriability class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Safe to retry as-is.
    Transient,
    /// Retriable after the user refreshes credentials.
    AuthRelated,
    /// Retrying will not help.
    Permanent,
}

/// Every failure reported over IPC carries one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Transient
    NetworkTimeout,
    ServiceUnavailable,
    RateLimited,
    PartialDownload,
    // Auth-related
    RequireAuth,
    CookieExpired,
    LoginRequired,
    // Permanent
    VideoPrivate,
    VideoRemoved,
    RegionBlocked,
    Unavailable,
    InvalidUrl,
    NoSuitableFormat,
    FileSizeExceedsLimit,
    UnknownError,
    // Operational codes surfaced by specific handlers
    FileNotFound,
    PlaylistError,
    ConfigError,
    MtprotoNotConnected,
    MtprotoUploadFailed,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "NETWORK_TIMEOUT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RateLimited => "RATE_LIMITED",
            Self::PartialDownload => "PARTIAL_DOWNLOAD",
            Self::RequireAuth => "REQUIRE_AUTH",
            Self::CookieExpired => "COOKIE_EXPIRED",
            Self::LoginRequired => "LOGIN_REQUIRED",
            Self::VideoPrivate => "VIDEO_PRIVATE",
            Self::VideoRemoved => "VIDEO_REMOVED",
            Self::RegionBlocked => "REGION_BLOCKED",
            Self::Unavailable => "UNAVAILABLE",
            Self::InvalidUrl => "INVALID_URL",
            Self::NoSuitableFormat => "NO_SUITABLE_FORMAT",
            Self::FileSizeExceedsLimit => "FILE_SIZE_EXCEEDS_LIMIT",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::PlaylistError => "PLAYLIST_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::MtprotoNotConnected => "MTPROTO_NOT_CONNECTED",
            Self::MtprotoUploadFailed => "MTPROTO_UPLOAD_FAILED",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NetworkTimeout
            | Self::ServiceUnavailable
            | Self::RateLimited
            | Self::PartialDownload
            | Self::MtprotoNotConnected
            | Self::MtprotoUploadFailed => ErrorCategory::Transient,

            Self::RequireAuth | Self::CookieExpired | Self::LoginRequired => {
                ErrorCategory::AuthRelated
            }

            Self::VideoPrivate
            | Self::VideoRemoved
            | Self::RegionBlocked
            | Self::Unavailable
            | Self::InvalidUrl
            | Self::NoSuitableFormat
            | Self::FileSizeExceedsLimit
            | Self::UnknownError
            | Self::FileNotFound
            | Self::PlaylistError
            | Self::ConfigError => ErrorCategory::Permanent,
        }
    }

    /// Retry is the parent's decision; this flag tells it whether retrying
    /// can possibly help.
    pub fn retriable(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Message shown to the end user. Technical detail goes to the log only.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Network timeout, retrying...",
            Self::ServiceUnavailable => "YouTube service busy, retrying...",
            Self::RateLimited => "Too many requests, waiting before retry...",
            Self::PartialDownload => "Download interrupted, retrying...",
            Self::RequireAuth => {
                "Age-restricted content - need fresh cookies. Use /help for instructions."
            }
            Self::CookieExpired => "Cookies expired. Export fresh cookies using browser extension.",
            Self::LoginRequired => "Video requires login. Check /help for cookie setup.",
            Self::VideoPrivate => "Video is private or has been deleted.",
            Self::VideoRemoved => "Video has been removed.",
            Self::RegionBlocked => "Video not available in your region.",
            Self::Unavailable => "Video is currently unavailable.",
            Self::InvalidUrl => "Invalid YouTube URL provided.",
            Self::NoSuitableFormat => "No downloadable format found for this video.",
            Self::FileSizeExceedsLimit => "File too large for audio download. Video exceeds limit.",
            Self::UnknownError => "Unknown error occurred. Check logs.",
            Self::FileNotFound => "Downloaded file not found.",
            Self::PlaylistError => "Failed to fetch playlist information.",
            Self::ConfigError => "Worker configuration is incomplete.",
            Self::MtprotoNotConnected => "Upload transport is not connected.",
            Self::MtprotoUploadFailed => "Upload to storage channel failed.",
        }
    }
}

impl From<DetectedFailure> for ErrorCode {
    fn from(failure: DetectedFailure) -> Self {
        match failure {
            DetectedFailure::BotCheck => Self::RequireAuth,
            DetectedFailure::PrivateVideo => Self::VideoPrivate,
            DetectedFailure::VideoRemoved => Self::VideoRemoved,
            DetectedFailure::NoSuitableFormat => Self::NoSuitableFormat,
            DetectedFailure::Unknown => Self::UnknownError,
        }
    }
}

/// Pattern-match a free-text failure message into a code.
///
/// Fallback classification for errors that did not come with structured
/// extractor output. Order matters: the earliest matching pattern wins.
pub fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("connection") {
        ErrorCode::NetworkTimeout
    } else if lower.contains("403") || lower.contains("forbidden") {
        ErrorCode::RequireAuth
    } else if lower.contains("429") || lower.contains("rate") {
        ErrorCode::RateLimited
    } else if lower.contains("503") {
        ErrorCode::ServiceUnavailable
    } else if lower.contains("private") {
        ErrorCode::VideoPrivate
    } else if lower.contains("unavailable") || lower.contains("removed") {
        ErrorCode::Unavailable
    } else if lower.contains("no suitable") || lower.contains("format") {
        ErrorCode::NoSuitableFormat
    } else {
        ErrorCode::UnknownError
    }
}

/// Classify any application error into an IPC code + displayable message.
pub fn classify_error(error: &Error) -> (ErrorCode, String) {
    match error {
        Error::Driver(DriverError::Timeout(_)) | Error::Driver(DriverError::LineTimeout(_)) => (
            ErrorCode::NetworkTimeout,
            ErrorCode::NetworkTimeout.user_message().to_string(),
        ),
        Error::Driver(DriverError::Failed {
            failure, message, ..
        }) => {
            let code = match ErrorCode::from(*failure) {
                ErrorCode::UnknownError => classify_message(message),
                known => known,
            };
            (code, message.clone())
        }
        Error::Validation(msg) => (ErrorCode::InvalidUrl, msg.clone()),
        other => {
            let code = classify_message(&other.to_string());
            (code, code.user_message().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_retriability() {
        assert_eq!(ErrorCode::NetworkTimeout.category(), ErrorCategory::Transient);
        assert!(ErrorCode::NetworkTimeout.retriable());
        assert_eq!(ErrorCode::RequireAuth.category(), ErrorCategory::AuthRelated);
        assert!(ErrorCode::RequireAuth.retriable());
        assert_eq!(ErrorCode::VideoPrivate.category(), ErrorCategory::Permanent);
        assert!(!ErrorCode::VideoPrivate.retriable());
        assert!(!ErrorCode::UnknownError.retriable());
    }

    #[test]
    fn message_patterns() {
        assert_eq!(classify_message("connection timeout while reading"), ErrorCode::NetworkTimeout);
        assert_eq!(classify_message("HTTP 403 Forbidden"), ErrorCode::RequireAuth);
        assert_eq!(classify_message("got 429, rate limited"), ErrorCode::RateLimited);
        assert_eq!(classify_message("server returned 503"), ErrorCode::ServiceUnavailable);
        assert_eq!(classify_message("this is a private video"), ErrorCode::VideoPrivate);
        assert_eq!(classify_message("video unavailable"), ErrorCode::Unavailable);
        assert_eq!(classify_message("no suitable format found"), ErrorCode::NoSuitableFormat);
        assert_eq!(classify_message("mystery"), ErrorCode::UnknownError);
    }

    #[test]
    fn driver_failures_map_to_codes() {
        let err = Error::Driver(DriverError::Failed {
            status: 1,
            failure: DetectedFailure::BotCheck,
            message: "Sign in to confirm".to_string(),
        });
        let (code, _) = classify_error(&err);
        assert_eq!(code, ErrorCode::RequireAuth);

        let timeout = Error::Driver(DriverError::Timeout(std::time::Duration::from_secs(1)));
        let (code, _) = classify_error(&timeout);
        assert_eq!(code, ErrorCode::NetworkTimeout);
    }

    #[test]
    fn unknown_driver_failure_falls_back_to_message_patterns() {
        let err = Error::Driver(DriverError::Failed {
            status: 1,
            failure: DetectedFailure::Unknown,
            message: "HTTP Error 429: Too Many Requests".to_string(),
        });
        let (code, message) = classify_error(&err);
        assert_eq!(code, ErrorCode::RateLimited);
        assert!(message.contains("429"));
    }
}
