//! Stateful parsing of extractor stderr into typed progress events.
//!
//! The extractor prints free-form status lines; only a handful of shapes
//! carry information the worker cares about. `ProgressCollector` keeps the
//! running progress state across lines and throttles outward emission so
//! IPC traffic stays bounded no matter how chatty the child is.

use std::sync::OnceLock;

use regex::Regex;

fn full_progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[download\]\s+(?P<percent>\d+\.\d+)%.*?at\s+(?P<speed>\S+)\s+ETA\s+(?P<eta>\S+)")
            .unwrap()
    })
}

fn bare_progress_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[download\]\s+(?P<percent>\d+\.\d+)%").unwrap())
}

fn destination_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(?:ExtractAudio|download|Merger)\]\s+Destination:\s+(?P<path>.+)$").unwrap()
    })
}

fn already_downloaded_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[download\]\s+(?P<path>.+?)\s+has already been downloaded").unwrap()
    })
}

fn playlist_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Downloading item 3 of 10" (current) / "Downloading video 3 of 10" (older)
    RE.get_or_init(|| {
        Regex::new(r"Downloading (?:item|video)\s+(?P<index>\d+)\s+of\s+(?P<total>\d+)").unwrap()
    })
}

/// Phase of a download as reported by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressStatus {
    #[default]
    Pending,
    Downloading,
    Converting,
    Done,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Converting => "converting",
            Self::Done => "done",
        }
    }
}

/// Running progress state for one download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: u8,
    pub speed: String,
    pub eta_seconds: u32,
    pub status: ProgressStatus,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self {
            percent: 0,
            speed: "0 B/s".to_string(),
            eta_seconds: 0,
            status: ProgressStatus::Pending,
        }
    }
}

/// A significant event recognised in one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// Progress changed enough to be worth forwarding.
    Progress(DownloadProgress),
    /// The extractor announced the final output file.
    Destination(String),
    /// The file already existed; destination is known and the item is done.
    AlreadyDownloaded(String),
    /// A raw `ERROR` line, captured verbatim.
    Error(String),
    /// The download hit 100%.
    Completed(DownloadProgress),
    /// Batch mode moved on to the next playlist entry.
    PlaylistItem { index: u32, total: u32 },
}

/// Parse one line against the known extractor output shapes.
///
/// `progress` is mutated in place: lines that carry only a percentage keep
/// the previously seen speed/ETA.
pub fn parse_line(line: &str, progress: &mut DownloadProgress) -> Option<ParserEvent> {
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = full_progress_re().captures(line) {
        progress.percent = percent_from(&caps["percent"]);
        progress.speed = caps["speed"].to_string();
        progress.eta_seconds = parse_eta(&caps["eta"]);
        progress.status = ProgressStatus::Downloading;
        if progress.percent >= 100 {
            progress.status = ProgressStatus::Done;
            return Some(ParserEvent::Completed(progress.clone()));
        }
        return Some(ParserEvent::Progress(progress.clone()));
    }

    if let Some(caps) = bare_progress_re().captures(line) {
        progress.percent = percent_from(&caps["percent"]);
        progress.status = ProgressStatus::Downloading;
        if progress.percent >= 100 {
            progress.status = ProgressStatus::Done;
            return Some(ParserEvent::Completed(progress.clone()));
        }
        return Some(ParserEvent::Progress(progress.clone()));
    }

    if line.starts_with("[ExtractAudio]") && line.contains("Converting") {
        progress.status = ProgressStatus::Converting;
        progress.percent = (progress.percent + 2).min(95);
        return Some(ParserEvent::Progress(progress.clone()));
    }

    if let Some(caps) = playlist_item_re().captures(line) {
        return Some(ParserEvent::PlaylistItem {
            index: caps["index"].parse().unwrap_or(0),
            total: caps["total"].parse().unwrap_or(0),
        });
    }

    if let Some(caps) = destination_re().captures(line) {
        return Some(ParserEvent::Destination(caps["path"].to_string()));
    }

    if let Some(caps) = already_downloaded_re().captures(line) {
        return Some(ParserEvent::AlreadyDownloaded(caps["path"].to_string()));
    }

    if line.to_uppercase().contains("ERROR") {
        return Some(ParserEvent::Error(line.trim().to_string()));
    }

    if line.contains("[download]") && line.contains("100%") {
        progress.percent = 100;
        progress.status = ProgressStatus::Done;
        return Some(ParserEvent::Completed(progress.clone()));
    }

    None
}

fn percent_from(s: &str) -> u8 {
    s.parse::<f64>().unwrap_or(0.0).min(100.0) as u8
}

/// Parse an ETA string (`M:SS` or `H:MM:SS`) to seconds. `Unknown` and
/// anything unparseable map to 0.
pub fn parse_eta(eta: &str) -> u32 {
    if eta.is_empty() || eta.eq_ignore_ascii_case("unknown") {
        return 0;
    }

    let parts: Vec<&str> = eta.split(':').collect();
    let nums: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();

    match nums.as_deref() {
        Some([m, s]) => m * 60 + s,
        Some([h, m, s]) => h * 3600 + m * 60 + s,
        _ => 0,
    }
}

/// Parse a human size string ("1.2MB", "500KB") to bytes; 0 if unparseable.
pub fn parse_size(size: &str) -> u64 {
    let upper = size.trim().to_uppercase();
    // Longest suffixes first so "KB" isn't matched as "B".
    for (unit, mult) in [
        ("TB", 1u64 << 40),
        ("GB", 1u64 << 30),
        ("MB", 1u64 << 20),
        ("KB", 1u64 << 10),
        ("B", 1),
    ] {
        if let Some(number) = upper.strip_suffix(unit) {
            return number
                .trim()
                .parse::<f64>()
                .map(|n| (n * mult as f64) as u64)
                .unwrap_or(0);
        }
    }
    0
}

/// Number of consecutive unemitted updates after which one is forced out.
const THROTTLE_THRESHOLD: u32 = 2;

/// Minimum percent delta that always passes the throttle.
const EMIT_PERCENT_DELTA: u8 = 5;

/// Line-fed collector that throttles progress emission.
///
/// Progress events pass through only when the percentage moved by at least
/// [`EMIT_PERCENT_DELTA`] points or every [`THROTTLE_THRESHOLD`]-th update.
/// Destination, completion and error events always pass through.
#[derive(Debug, Default)]
pub struct ProgressCollector {
    current: DownloadProgress,
    last_emitted_percent: u8,
    updates_since_emit: u32,
}

impl ProgressCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stderr line; returns an event when it should be forwarded.
    pub fn observe(&mut self, line: &str) -> Option<ParserEvent> {
        let event = parse_line(line, &mut self.current)?;

        match event {
            ParserEvent::Progress(_) => {
                self.updates_since_emit += 1;
                let delta = self.current.percent.abs_diff(self.last_emitted_percent);
                if delta >= EMIT_PERCENT_DELTA || self.updates_since_emit >= THROTTLE_THRESHOLD {
                    self.last_emitted_percent = self.current.percent;
                    self.updates_since_emit = 0;
                    Some(ParserEvent::Progress(self.current.clone()))
                } else {
                    None
                }
            }
            other => Some(other),
        }
    }

    /// Current progress state, regardless of throttling.
    pub fn current(&self) -> &DownloadProgress {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_progress_line() {
        let mut p = DownloadProgress::default();
        let event = parse_line("[download]  42.3% of 10.00MiB at 1.21MiB/s ETA 00:31", &mut p);

        assert!(matches!(event, Some(ParserEvent::Progress(_))));
        assert_eq!(p.percent, 42);
        assert_eq!(p.speed, "1.21MiB/s");
        assert_eq!(p.eta_seconds, 31);
        assert_eq!(p.status, ProgressStatus::Downloading);
    }

    #[test]
    fn bare_percent_keeps_previous_speed_and_eta() {
        let mut p = DownloadProgress::default();
        parse_line("[download]  10.0% of 10.00MiB at 2.00MiB/s ETA 1:30", &mut p);
        parse_line("[download]  15.5%", &mut p);

        assert_eq!(p.percent, 15);
        assert_eq!(p.speed, "2.00MiB/s");
        assert_eq!(p.eta_seconds, 90);
    }

    #[test]
    fn converting_bumps_percent_capped_at_95() {
        let mut p = DownloadProgress {
            percent: 94,
            ..Default::default()
        };
        parse_line("[ExtractAudio] Converting audio; Destination handled later", &mut p);
        assert_eq!(p.percent, 95);
        assert_eq!(p.status, ProgressStatus::Converting);

        parse_line("[ExtractAudio] Converting again", &mut p);
        assert_eq!(p.percent, 95);
    }

    #[test]
    fn recognises_destination_lines() {
        let mut p = DownloadProgress::default();
        for prefix in ["ExtractAudio", "download", "Merger"] {
            let line = format!("[{prefix}] Destination: /out/track.mp3");
            let event = parse_line(&line, &mut p);
            assert_eq!(
                event,
                Some(ParserEvent::Destination("/out/track.mp3".to_string()))
            );
        }
    }

    #[test]
    fn already_downloaded_announces_path() {
        let mut p = DownloadProgress::default();
        let event = parse_line("[download] /out/track.mp3 has already been downloaded", &mut p);
        assert_eq!(
            event,
            Some(ParserEvent::AlreadyDownloaded("/out/track.mp3".to_string()))
        );
    }

    #[test]
    fn hundred_percent_completes() {
        let mut p = DownloadProgress::default();
        let event = parse_line("[download] 100.0% of 10.00MiB at 3MiB/s ETA 00:00", &mut p);
        assert!(matches!(event, Some(ParserEvent::Completed(_))));
        assert_eq!(p.percent, 100);
        assert_eq!(p.status, ProgressStatus::Done);
    }

    #[test]
    fn error_lines_are_captured_verbatim() {
        let mut p = DownloadProgress::default();
        let event = parse_line("ERROR: [youtube] abc: Video unavailable", &mut p);
        assert_eq!(
            event,
            Some(ParserEvent::Error(
                "ERROR: [youtube] abc: Video unavailable".to_string()
            ))
        );
    }

    #[test]
    fn playlist_item_lines() {
        let mut p = DownloadProgress::default();
        assert_eq!(
            parse_line("[download] Downloading item 3 of 10", &mut p),
            Some(ParserEvent::PlaylistItem { index: 3, total: 10 })
        );
        assert_eq!(
            parse_line("[download] Downloading video 7 of 50", &mut p),
            Some(ParserEvent::PlaylistItem { index: 7, total: 50 })
        );
    }

    #[test]
    fn eta_formats() {
        assert_eq!(parse_eta("2:30"), 150);
        assert_eq!(parse_eta("1:45:30"), 6330);
        assert_eq!(parse_eta("Unknown"), 0);
        assert_eq!(parse_eta("garbage"), 0);
        assert_eq!(parse_eta(""), 0);
    }

    #[test]
    fn size_strings() {
        assert_eq!(parse_size("1.5MB"), (1.5 * 1024.0 * 1024.0) as u64);
        assert_eq!(parse_size("500KB"), 500 * 1024);
        assert_eq!(parse_size("2GB"), 2 << 30);
        assert_eq!(parse_size("nonsense"), 0);
    }

    #[test]
    fn collector_throttles_small_steps() {
        let mut c = ProgressCollector::new();

        // First observation: delta from 0 is below 5 but counts as one update.
        assert!(c.observe("[download]   1.0% at 1MiB/s ETA 0:10").is_none());
        // Second unemitted update forces emission.
        assert!(c.observe("[download]   2.0% at 1MiB/s ETA 0:10").is_some());
        // Small step right after an emission is suppressed again.
        assert!(c.observe("[download]   3.0% at 1MiB/s ETA 0:10").is_none());
        // A ≥5 point jump always goes out.
        assert!(c.observe("[download]  20.0% at 1MiB/s ETA 0:08").is_some());
    }

    #[test]
    fn collector_never_swallows_terminal_events() {
        let mut c = ProgressCollector::new();
        assert!(matches!(
            c.observe("[ExtractAudio] Destination: /out/a.mp3"),
            Some(ParserEvent::Destination(_))
        ));
        assert!(matches!(
            c.observe("ERROR: boom"),
            Some(ParserEvent::Error(_))
        ));
        assert!(matches!(
            c.observe("[download] 100% of 3MiB in 00:02"),
            Some(ParserEvent::Completed(_))
        ));
    }
}
