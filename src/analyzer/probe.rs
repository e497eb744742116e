use regex::Regex;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::{debug, warn};

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration: (.*?), start: (.*?), bitrate: (\d*) kb/s")
        .expect("duration pattern is valid")
});

// Two or more digits on each side so codec tags like `0x31637661` are skipped.
static RESOLUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Video:[^\n]*?\b(\d{2,5})x(\d{2,5})\b").expect("resolution pattern is valid")
});

/// Media metadata scraped from ffmpeg's diagnostic output.
///
/// Every field is empty when the corresponding token was not found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub duration: String,
    pub start: String,
    pub bitrate: String,
    /// `WxH`
    pub resolution: String,
}

impl MediaInfo {
    /// Parse a full stderr capture
    pub fn parse(diagnostics: &str) -> Self {
        let mut info = MediaInfo::default();

        if let Some(caps) = DURATION_PATTERN.captures(diagnostics) {
            info.duration = caps[1].to_string();
            info.start = caps[2].to_string();
            info.bitrate = format!("{} kb/s", &caps[3]);
        }

        if let Some(caps) = RESOLUTION_PATTERN.captures(diagnostics) {
            info.resolution = format!("{}x{}", &caps[1], &caps[2]);
        }

        info
    }

    /// Width of the first video stream, if the probe found one
    pub fn width(&self) -> Option<u32> {
        self.resolution
            .split_once('x')
            .and_then(|(w, _)| w.parse().ok())
    }
}

/// Probe a file by running `ffmpeg -y -i <input>` without an output.
///
/// ffmpeg exits non-zero in this mode; only its stderr matters. A launch
/// failure is logged and yields an empty `MediaInfo`.
pub fn probe(ffmpeg: &Path, input: &Path) -> MediaInfo {
    let output = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    match output {
        Ok(output) => {
            let info = MediaInfo::parse(&String::from_utf8_lossy(&output.stderr));
            debug!(
                "Probed {}: duration={:?} start={:?} bitrate={:?} resolution={:?}",
                input.display(),
                info.duration,
                info.start,
                info.bitrate,
                info.resolution
            );
            info
        }
        Err(e) => {
            warn!("Failed to probe {}: {}", input.display(), e);
            MediaInfo::default()
        }
    }
}
