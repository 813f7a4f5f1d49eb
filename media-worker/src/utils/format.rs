//! Human-readable size and duration formatting.

/// Format a byte count as "N.N UNIT" (B/KB/MB/GB/TB/PB).
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

/// Compact filesize suffix used in format labels ("512KB", "3.4MB", "1.2GB").
///
/// Returns an empty string for zero so callers can skip the decoration.
pub fn format_filesize(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes == 0 {
        String::new()
    } else if bytes < MB {
        format!("{:.0}KB", bytes as f64 / 1024.0)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1}GB", bytes as f64 / GB as f64)
    }
}

/// Format a duration in seconds as `H:MM:SS`, `M:SS` or `Ns`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else if minutes > 0 {
        format!("{minutes}:{secs:02}")
    } else {
        format!("{secs}s")
    }
}

/// Duration string for metadata display; zero or unknown becomes "Unknown".
pub fn format_duration_or_unknown(seconds: u64) -> String {
    if seconds == 0 {
        "Unknown".to_string()
    } else {
        format_duration(seconds)
    }
}
