//! Driver error types and stderr failure classification.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while supervising an extractor process.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn extractor '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("failed to capture extractor {stream} pipe")]
    Pipe { stream: &'static str },

    #[error("extractor produced no output for {0:?}")]
    LineTimeout(Duration),

    #[error("extractor exceeded the overall deadline of {0:?}")]
    Timeout(Duration),

    #[error("extractor exited with status {status}: {message}")]
    Failed {
        status: i32,
        failure: DetectedFailure,
        message: String,
    },

    #[error("extractor output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("I/O error on extractor pipe: {0}")]
    Io(#[from] std::io::Error),
}

/// Known failure phrases recognised in extractor stderr.
///
/// The extractor reports most fatal conditions as free-text `ERROR:` lines;
/// these are the phrases worth telling apart because callers react to them
/// differently (auth refresh vs. give up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFailure {
    /// "Sign in to confirm" / "confirm you're not a bot".
    BotCheck,
    /// Private or deleted video.
    PrivateVideo,
    /// Video removed from the platform.
    VideoRemoved,
    /// No format satisfied the requested chain.
    NoSuitableFormat,
    /// Nothing recognisable.
    Unknown,
}

impl std::fmt::Display for DetectedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BotCheck => "bot check triggered",
            Self::PrivateVideo => "video is private",
            Self::VideoRemoved => "video has been removed",
            Self::NoSuitableFormat => "no suitable format",
            Self::Unknown => "unclassified extractor failure",
        };
        f.write_str(s)
    }
}

/// Scan collected stderr for known failure phrases.
pub fn classify_stderr(lines: &[String]) -> DetectedFailure {
    let joined = lines.join(" ").to_lowercase();

    if joined.contains("sign in to confirm") || joined.contains("confirm you're not a bot") {
        DetectedFailure::BotCheck
    } else if joined.contains("private video") || joined.contains("video is private") {
        DetectedFailure::PrivateVideo
    } else if joined.contains("video unavailable") || joined.contains("has been removed") {
        DetectedFailure::VideoRemoved
    } else if joined.contains("no suitable format") {
        DetectedFailure::NoSuitableFormat
    } else {
        DetectedFailure::Unknown
    }
}

/// Extract the last `ERROR:` message from stderr, for user display.
pub fn last_error_line(lines: &[String]) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        line.split_once("ERROR:")
            .map(|(_, msg)| msg.trim().to_string())
            .filter(|msg| !msg.is_empty())
    })
}
