//! Shared helpers: sanitization, URL handling, formatting, filesystem.

pub mod filename;
pub mod format;
pub mod fs;
pub mod url;
