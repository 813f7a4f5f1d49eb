//! Filename and folder-name sanitization.
//!
//! Titles arrive straight from the extractor and end up as path components;
//! everything that could traverse, escape or break a filesystem is stripped
//! here while keeping valid Unicode (CJK titles are common) intact.

use std::sync::OnceLock;

use regex::Regex;

/// Default cap for sanitized file names.
const FILENAME_MAX_LENGTH: usize = 200;

fn invalid_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn clean(input: &str, max_length: usize) -> String {
    // Path traversal first, then per-character filtering.
    let stripped = input.replace("..", "").replace(['/', '\\'], "");
    let no_invalid = invalid_chars_re().replace_all(&stripped, "");
    let collapsed = whitespace_re().replace_all(&no_invalid, " ");
    collapsed.trim().chars().take(max_length).collect()
}

/// Sanitize a file name for use inside an output directory.
///
/// Empty results fall back to `"untitled"`.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned = clean(filename, FILENAME_MAX_LENGTH);
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Sanitize a playlist folder name; falls back to `"playlist"`.
pub fn sanitize_folder_name(folder_name: &str, max_length: usize) -> String {
    let cleaned = clean(folder_name, max_length);
    if cleaned.is_empty() {
        "playlist".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_traversal_and_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("a/b\\c"), "abc");
    }

    #[test]
    fn strips_invalid_and_control_chars() {
        assert_eq!(sanitize_filename("a<b>c:d\"e|f?g*h"), "abcdefgh");
        assert_eq!(sanitize_filename("x\x00y\x1fz"), "xyz");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(sanitize_filename("  My   Track \t Name "), "My Track Name");
    }

    #[test]
    fn preserves_unicode() {
        assert_eq!(sanitize_filename("观看一只青蛙"), "观看一只青蛙");
    }

    #[test]
    fn empty_falls_back() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("???"), "untitled");
        assert_eq!(sanitize_folder_name("", 100), "playlist");
    }

    #[test]
    fn caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 200);
        assert_eq!(sanitize_folder_name(&long, 100).len(), 100);
    }

    #[test]
    fn idempotent() {
        for input in ["../a?b", "  spaced   out  ", "观看?"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
        }
    }
}
