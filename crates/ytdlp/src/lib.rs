//! yt-dlp process driver.
//!
//! This crate owns everything between "a handler wants an extraction" and
//! "typed events come out": building a fully argv-validated invocation,
//! spawning the extractor with both pipes drained, parsing its stderr into
//! progress events, and classifying failures from collected output.
//!
//! No shell is ever involved; the extractor is launched directly with an
//! argument vector and a closed stdin.

pub mod error;
pub mod invocation;
pub mod progress;
pub mod runner;

pub use error::{DetectedFailure, DriverError, classify_stderr, last_error_line};
pub use invocation::{AudioExtract, Invocation};
pub use progress::{DownloadProgress, ParserEvent, ProgressCollector, ProgressStatus};
pub use runner::{CaptureOutput, RunOptions, RunOutcome, StreamEvent, run_capture, run_streaming};
