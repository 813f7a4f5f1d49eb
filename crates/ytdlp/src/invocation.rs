//! Invocation policy: turning a download request into an argument vector.
//!
//! The extractor is always launched with explicit argv — never through a
//! shell — so every knob the worker uses is modelled here and rendered in a
//! fixed order. Cookie presence drives the player-client selection: the
//! android client bypasses datacenter bot checks but cannot carry cookies,
//! so authenticated runs switch to the web client.

use std::path::{Path, PathBuf};

/// Audio extraction settings (`-x --audio-format … [--audio-quality …]`).
#[derive(Debug, Clone)]
pub struct AudioExtract {
    pub format: String,
    /// Extractor quality knob: "0" best … "9" worst, or a bitrate.
    pub quality: Option<String>,
}

/// A fully described extractor invocation.
///
/// Build one with [`Invocation::new`] and the `with_*` methods, then hand it
/// to the runner. `to_args` renders the final argument vector.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// URL or `ytsearchN:query` target.
    target: String,
    format_chain: Option<String>,
    audio_extract: Option<AudioExtract>,
    output_template: Option<String>,
    cookies_file: Option<PathBuf>,
    js_runtime: Option<String>,
    remote_components: bool,
    dump_single_json: bool,
    flat_playlist: bool,
    yes_playlist: bool,
    ignore_errors: bool,
    no_check_certificate: bool,
    socket_timeout_secs: Option<u32>,
    playlist_end: Option<u32>,
    download_archive: Option<PathBuf>,
    prints: Vec<String>,
    progress_template: Option<String>,
}

impl Invocation {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// `-f` format selector chain.
    pub fn with_format_chain(mut self, chain: impl Into<String>) -> Self {
        self.format_chain = Some(chain.into());
        self
    }

    pub fn with_audio_extract(mut self, extract: AudioExtract) -> Self {
        self.audio_extract = Some(extract);
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = Some(template.into());
        self
    }

    /// Attach a Netscape cookie file; also flips the player-client policy.
    pub fn with_cookies(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    /// External JS runtime for signature / n-challenge solving.
    pub fn with_js_runtime(mut self, node_bin: Option<String>) -> Self {
        self.remote_components = node_bin.is_some();
        self.js_runtime = node_bin;
        self
    }

    pub fn dump_single_json(mut self) -> Self {
        self.dump_single_json = true;
        self
    }

    pub fn flat_playlist(mut self) -> Self {
        self.flat_playlist = true;
        self
    }

    pub fn yes_playlist(mut self) -> Self {
        self.yes_playlist = true;
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn no_check_certificate(mut self) -> Self {
        self.no_check_certificate = true;
        self
    }

    pub fn with_socket_timeout(mut self, secs: u32) -> Self {
        self.socket_timeout_secs = Some(secs);
        self
    }

    pub fn with_playlist_end(mut self, end: u32) -> Self {
        self.playlist_end = Some(end);
        self
    }

    pub fn with_download_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_archive = Some(path.into());
        self
    }

    /// Add a `--print TEMPLATE` side-channel record.
    pub fn with_print(mut self, template: impl Into<String>) -> Self {
        self.prints.push(template.into());
        self
    }

    pub fn with_progress_template(mut self, template: impl Into<String>) -> Self {
        self.progress_template = Some(template.into());
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn cookies_file(&self) -> Option<&Path> {
        self.cookies_file.as_deref()
    }

    /// Render the final argument vector.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.target.clone()];

        if self.yes_playlist {
            args.push("--yes-playlist".to_string());
        }
        if self.dump_single_json {
            args.push("--dump-single-json".to_string());
        }
        if self.flat_playlist {
            args.push("--flat-playlist".to_string());
        }

        args.push("--no-cache-dir".to_string());

        if self.no_check_certificate {
            args.push("--no-check-certificate".to_string());
        }
        if self.ignore_errors {
            args.push("--ignore-errors".to_string());
        }
        if let Some(secs) = self.socket_timeout_secs {
            args.extend(["--socket-timeout".to_string(), secs.to_string()]);
        }
        if let Some(end) = self.playlist_end {
            args.extend(["--playlist-end".to_string(), end.to_string()]);
        }

        if let Some(ref chain) = self.format_chain {
            args.extend(["-f".to_string(), chain.clone()]);
            // Merged video+audio selections need a container to merge into.
            if chain.contains('+') {
                args.extend(["--merge-output-format".to_string(), "mp4".to_string()]);
            }
        }

        if let Some(ref extract) = self.audio_extract {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                extract.format.clone(),
            ]);
            if let Some(ref quality) = extract.quality {
                args.extend(["--audio-quality".to_string(), quality.clone()]);
            }
        }

        if let Some(ref template) = self.output_template {
            args.extend(["-o".to_string(), template.clone()]);
        }

        if let Some(ref cookies) = self.cookies_file {
            args.extend([
                "--cookies".to_string(),
                cookies.to_string_lossy().into_owned(),
            ]);
        }

        // android does not support cookies; web does but trips bot checks
        // from datacenter IPs, hence the split.
        let player_clients = if self.cookies_file.is_some() {
            "web"
        } else {
            "android,web"
        };
        args.extend([
            "--extractor-args".to_string(),
            format!("youtube:player_client={player_clients}"),
        ]);

        if let Some(ref node_bin) = self.js_runtime {
            args.extend(["--js-runtimes".to_string(), format!("node:{node_bin}")]);
            if self.remote_components {
                args.extend(["--remote-components".to_string(), "ejs:github".to_string()]);
            }
        }

        if let Some(ref archive) = self.download_archive {
            args.extend([
                "--download-archive".to_string(),
                archive.to_string_lossy().into_owned(),
            ]);
        }

        for print in &self.prints {
            args.extend(["--print".to_string(), print.clone()]);
        }

        if let Some(ref template) = self.progress_template {
            args.extend(["--progress-template".to_string(), template.clone()]);
        }

        args
    }
}
