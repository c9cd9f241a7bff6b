//! Display helpers for values stored alongside library items.

use chrono::{DateTime, Utc};

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// 1024-based human size with one decimal ("0 B", "512 B", "1.5 KB").
pub fn human_size(bytes: i64) -> String {
    if bytes <= 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

/// Relative age of `then` as seen from `now`.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 30 {
        plural(days, "day")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

/// Image entry as reported by Radarr/Sonarr.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaImage {
    #[serde(default)]
    pub cover_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
}

impl MediaImage {
    fn best_url(&self) -> Option<&str> {
        self.remote_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.url.as_deref().filter(|u| !u.is_empty()))
    }
}

/// The poster image if there is one, otherwise the first image with any URL.
pub fn select_poster(images: &[MediaImage]) -> Option<String> {
    images
        .iter()
        .filter(|i| i.cover_type.eq_ignore_ascii_case("poster"))
        .find_map(MediaImage::best_url)
        .or_else(|| images.iter().find_map(MediaImage::best_url))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(-5), "0 B");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(2_469_606_195), "2.3 GB");
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now - Duration::seconds(20), now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(time_ago(now - Duration::minutes(61), now), "1 hour ago");
        assert_eq!(time_ago(now - Duration::days(3), now), "3 days ago");
        assert_eq!(time_ago(now - Duration::days(65), now), "2 months ago");
        assert_eq!(time_ago(now - Duration::days(400), now), "1 year ago");
    }

    #[test]
    fn test_poster_priority() {
        let images = vec![
            MediaImage {
                cover_type: "fanart".into(),
                url: Some("/fanart.jpg".into()),
                remote_url: None,
            },
            MediaImage {
                cover_type: "poster".into(),
                url: Some("/poster.jpg".into()),
                remote_url: Some("https://image.tmdb.org/poster.jpg".into()),
            },
        ];
        assert_eq!(
            select_poster(&images).as_deref(),
            Some("https://image.tmdb.org/poster.jpg")
        );
        assert_eq!(select_poster(&images[..1]).as_deref(), Some("/fanart.jpg"));
        assert_eq!(select_poster(&[]), None);
    }
}
