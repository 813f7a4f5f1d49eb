//! URL validation and playlist URL normalisation.

use std::sync::OnceLock;

use regex::Regex;

/// YouTube-family hosts the worker will hand to the extractor.
const ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtube.co.uk",
    "youtu.be",
];

/// Characters rejected in search queries to keep them argv-safe.
const QUERY_FORBIDDEN: &[char] = &[';', '|', '&', '$', '`', '\n', '\r'];

fn radio_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"list=(RD([a-zA-Z0-9_-]+))").unwrap())
}

fn video_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"v=([a-zA-Z0-9_-]{11})").unwrap())
}

/// Check that a URL belongs to the YouTube family.
pub fn validate_youtube_url(raw: &str) -> bool {
    let Ok(parsed) = url::Url::parse(raw) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    parsed
        .host_str()
        .is_some_and(|host| ALLOWED_HOSTS.contains(&host.to_lowercase().as_str()))
}

/// Validate a search query: non-empty, bounded, free of shell metacharacters.
///
/// The query is only ever passed as a single argv element, but queries with
/// command-injection characters are refused outright rather than trusted.
pub fn validate_search_query(query: &str, max_length: usize) -> bool {
    !query.is_empty()
        && query.len() <= max_length
        && !query.contains(QUERY_FORBIDDEN)
        && !query.contains("$(")
}

/// Extract an 11-character video id from a watch URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    if let Some(rest) = url.split("watch?v=").nth(1) {
        return Some(rest.split('&').next().unwrap_or(rest).to_string());
    }
    if let Some(rest) = url.split("youtu.be/").nth(1) {
        return Some(rest.split('?').next().unwrap_or(rest).to_string());
    }
    None
}

/// Normalise YouTube playlist URLs for the extractor.
///
/// Radio Mix URLs (`list=RD…`) expire when used as a plain playlist URL and
/// must be rewritten to `watch?v=<seed>&list=RD<seed>&start_radio=1`. The
/// seed is recovered from an 11-character `v=` parameter, else from the `RD`
/// suffix when it is exactly 11 characters; otherwise the URL is returned
/// unchanged. The special mix families `RDMM`/`RDAM`/`RDCLAK` have no seed
/// video and are preserved as-is. Idempotent.
pub fn normalize_playlist_url(url: &str) -> String {
    let Some(caps) = radio_list_re().captures(url) else {
        return url.to_string();
    };

    let list_id = &caps[1];
    let list_suffix = caps[2].to_string();

    if list_id.starts_with("RDMM") || list_id.starts_with("RDAM") || list_id.starts_with("RDCLAK") {
        return url.to_string();
    }

    let video_id = if let Some(v) = video_id_re().captures(url) {
        v[1].to_string()
    } else if list_suffix.len() == 11 {
        list_suffix
    } else {
        return url.to_string();
    };

    format!("https://www.youtube.com/watch?v={video_id}&list=RD{video_id}&start_radio=1")
}

/// Whether a URL refers to a Radio Mix playlist.
pub fn is_radio_mix(url: &str) -> bool {
    url.contains("list=RD")
}

/// Whether a URL points at one specific video (no playlist context).
///
/// Pool rows prefer specific video URLs over playlist URLs; this is the
/// gate for the origin-URL upgrade on re-ingest.
pub fn is_specific_video_url(url: &str) -> bool {
    url.contains("watch?v=") && !url.contains("list=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_youtube_family() {
        assert!(validate_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(validate_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(validate_youtube_url("https://m.youtube.com/watch?v=abc"));
    }

    #[test]
    fn rejects_other_hosts_and_schemes() {
        assert!(!validate_youtube_url("https://example.com/watch?v=abc"));
        assert!(!validate_youtube_url("https://notyoutube.com/x"));
        assert!(!validate_youtube_url("ftp://youtube.com/x"));
        assert!(!validate_youtube_url("not a url"));
        // Lookalike subdomain of another host
        assert!(!validate_youtube_url("https://youtube.com.evil.net/x"));
    }

    #[test]
    fn query_validation() {
        assert!(validate_search_query("lofi beats", 100));
        assert!(!validate_search_query("", 100));
        assert!(!validate_search_query(&"x".repeat(101), 100));
        for bad in ["a;b", "a|b", "a&b", "a$b", "a`b", "a\nb", "a$(b)"] {
            assert!(!validate_search_query(bad, 100), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn video_id_extraction() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=1"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=x"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(extract_video_id("https://youtube.com/playlist?list=PL1"), None);
    }

    #[test]
    fn radio_mix_from_playlist_form() {
        assert_eq!(
            normalize_playlist_url("https://www.youtube.com/playlist?list=RDEgBJmlPo8Xw"),
            "https://www.youtube.com/watch?v=EgBJmlPo8Xw&list=RDEgBJmlPo8Xw&start_radio=1"
        );
    }

    #[test]
    fn radio_mix_truncated_list_fixed_from_v_param() {
        // Truncated list id; the v= parameter supplies the seed.
        assert_eq!(
            normalize_playlist_url("https://www.youtube.com/watch?v=EgBJmlPo8Xw&list=RDEgBJmlPo"),
            "https://www.youtube.com/watch?v=EgBJmlPo8Xw&list=RDEgBJmlPo8Xw&start_radio=1"
        );
    }

    #[test]
    fn radio_mix_already_canonical_is_unchanged_in_meaning() {
        let canonical = "https://www.youtube.com/watch?v=EgBJmlPo8Xw&list=RDEgBJmlPo8Xw&start_radio=1";
        assert_eq!(normalize_playlist_url(canonical), canonical);
    }

    #[test]
    fn special_mix_families_preserved() {
        for url in [
            "https://www.youtube.com/watch?v=abc&list=RDMMdQw4w9WgXcQ",
            "https://www.youtube.com/playlist?list=RDAMVMx",
            "https://www.youtube.com/playlist?list=RDCLAK5uy_abc",
        ] {
            assert_eq!(normalize_playlist_url(url), url);
        }
    }

    #[test]
    fn unrecoverable_seed_left_unchanged() {
        // No v= parameter and an RD suffix that is not 11 chars.
        let url = "https://www.youtube.com/playlist?list=RDshort";
        assert_eq!(normalize_playlist_url(url), url);
    }

    #[test]
    fn ordinary_playlists_untouched() {
        let url = "https://www.youtube.com/playlist?list=PLabcdef";
        assert_eq!(normalize_playlist_url(url), url);
    }

    #[test]
    fn normalisation_is_idempotent() {
        for url in [
            "https://www.youtube.com/playlist?list=RDEgBJmlPo8Xw",
            "https://www.youtube.com/playlist?list=PLabcdef",
            "https://www.youtube.com/playlist?list=RDMMx",
            "https://youtu.be/dQw4w9WgXcQ",
        ] {
            let once = normalize_playlist_url(url);
            assert_eq!(normalize_playlist_url(&once), once);
        }
    }

    #[test]
    fn specific_video_url_detection() {
        assert!(is_specific_video_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_specific_video_url("https://www.youtube.com/watch?v=abc&list=RDabc"));
        assert!(!is_specific_video_url("https://www.youtube.com/playlist?list=PL1"));
    }
}
