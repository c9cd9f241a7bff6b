//! Classification heuristics for playback sessions.
//!
//! The device and quality rules are substring heuristics over whatever the
//! media server reports, so they live behind a trait and can be swapped.

use crate::db::sessions::{DeviceType, PlaybackMethod, VideoQuality};

/// What the webhook tells us about the video stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityHint {
    /// Free-form label such as "4K HEVC HDR" or "1080p".
    pub label: Option<String>,
    pub height: Option<i64>,
    pub hdr: bool,
}

pub trait PlaybackPolicy: Send + Sync {
    fn device_type(&self, client_name: Option<&str>, device_name: Option<&str>) -> DeviceType;
    fn video_quality(&self, hint: &QualityHint) -> VideoQuality;
    fn playback_method(&self, is_transcoding: bool, is_direct_play: bool) -> PlaybackMethod;
    fn is_watched(&self, watched_seconds: i64, duration_seconds: Option<i64>) -> bool;
}

#[derive(Debug, Clone)]
pub struct DefaultPlaybackPolicy {
    /// Fraction of the runtime that counts as watched.
    pub watched_threshold: f64,
}

impl Default for DefaultPlaybackPolicy {
    fn default() -> Self {
        Self {
            watched_threshold: 0.30,
        }
    }
}

/// Matched as whole words so "webOS" and "Chromecast" fall through to later checks.
const BROWSER: &[&str] = &["chrome", "chromium", "firefox", "safari", "edge", "opera", "browser", "web"];
const MOBILE: &[&str] = &["iphone", "ipad", "ios", "android", "mobile", "phone"];
const STREAMING: &[&str] = &[
    "roku",
    "chromecast",
    "fire tv",
    "firetv",
    "fire stick",
    "shield",
    "apple tv",
    "appletv",
    "tvos",
];
const SMART_TV: &[&str] = &[
    "smart tv", "smarttv", "tizen", "samsung", "webos", "lg tv", "vizio", "hisense", "android tv",
    "bravia",
];
const DESKTOP: &[&str] = &[
    "windows",
    "macos",
    "mac os",
    "linux",
    "desktop",
    "media player",
    "theater",
];
const CONSOLE: &[&str] = &["xbox", "playstation", "ps4", "ps5", "nintendo", "switch"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn is_browser(name: &str) -> bool {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| BROWSER.contains(&word))
}

fn is_mobile(name: &str) -> bool {
    // "Android TV" is a television, not a phone.
    contains_any(name, MOBILE) && !name.contains(" tv")
}

impl PlaybackPolicy for DefaultPlaybackPolicy {
    fn device_type(&self, client_name: Option<&str>, device_name: Option<&str>) -> DeviceType {
        let name = format!(
            "{} {}",
            client_name.unwrap_or_default(),
            device_name.unwrap_or_default()
        )
        .to_lowercase();

        let chain: [(fn(&str) -> bool, DeviceType); 6] = [
            (is_browser, DeviceType::Browser),
            (is_mobile, DeviceType::Mobile),
            (|n| contains_any(n, STREAMING), DeviceType::Streaming),
            (|n| contains_any(n, SMART_TV), DeviceType::SmartTv),
            (|n| contains_any(n, DESKTOP), DeviceType::Desktop),
            (|n| contains_any(n, CONSOLE), DeviceType::Console),
        ];

        chain
            .iter()
            .find(|(matches, _)| matches(&name))
            .map(|(_, device)| *device)
            .unwrap_or(DeviceType::Other)
    }

    fn video_quality(&self, hint: &QualityHint) -> VideoQuality {
        let label = hint.label.as_deref().unwrap_or_default().to_lowercase();
        let height = hint.height.unwrap_or(0);
        let hdr = hint.hdr
            || contains_any(&label, &["hdr", "dolby vision", "dovi", "hlg"]);

        if height >= 2000 || contains_any(&label, &["4k", "2160", "uhd"]) {
            if hdr {
                VideoQuality::Uhd4kHdr
            } else {
                VideoQuality::Uhd4k
            }
        } else if height >= 1000 || label.contains("1080") {
            VideoQuality::Hd1080
        } else if height >= 700 || label.contains("720") {
            VideoQuality::Hd720
        } else if height >= 450 || label.contains("480") || label.contains("576") {
            VideoQuality::Sd480
        } else if height > 0 || label.contains("360") {
            VideoQuality::Sd360
        } else {
            VideoQuality::Unknown
        }
    }

    fn playback_method(&self, is_transcoding: bool, is_direct_play: bool) -> PlaybackMethod {
        if is_transcoding {
            PlaybackMethod::Transcode
        } else if is_direct_play {
            PlaybackMethod::DirectPlay
        } else {
            PlaybackMethod::DirectStream
        }
    }

    fn is_watched(&self, watched_seconds: i64, duration_seconds: Option<i64>) -> bool {
        match duration_seconds.filter(|d| *d > 0) {
            Some(duration) => watched_seconds as f64 >= duration as f64 * self.watched_threshold,
            None => false,
        }
    }
}
