//! Calendar feeds into `calendar_events`.

use crate::connectors::radarr::RadarrCalendarEntry;
use crate::connectors::sonarr::SonarrCalendarEntry;
use crate::connectors::ServiceKind;
use crate::db::calendar::{self, CalendarMerge, NewCalendarEvent, PLACEHOLDER_TITLE};
use crate::db::MediaType;
use crate::error::Result;
use crate::format::select_poster;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CalendarWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

pub fn movie_events(entries: &[RadarrCalendarEntry], window: CalendarWindow) -> Vec<NewCalendarEvent> {
    entries
        .iter()
        .filter(|e| !e.title.trim().is_empty())
        .flat_map(|entry| {
            let image_url = select_poster(&entry.images);
            entry
                .releases()
                .into_iter()
                .filter(move |(date, _)| window.contains(*date))
                .map(move |(release_date, kind)| NewCalendarEvent {
                    title: entry.title.trim().to_string(),
                    release_date,
                    media_type: MediaType::Movie,
                    episode_label: None,
                    event_type: kind.to_string(),
                    image_url: image_url.clone(),
                    source_service: ServiceKind::Radarr.to_string(),
                })
        })
        .collect()
}

pub fn episode_events(entries: &[SonarrCalendarEntry], window: CalendarWindow) -> Vec<NewCalendarEvent> {
    entries
        .iter()
        .filter_map(|entry| {
            let release_date = entry.air_date().filter(|d| window.contains(*d))?;
            Some(NewCalendarEvent {
                title: entry.series_title().unwrap_or(PLACEHOLDER_TITLE).to_string(),
                release_date,
                media_type: MediaType::Tv,
                episode_label: Some(entry.episode_label()),
                event_type: "episode".to_string(),
                image_url: entry.image_url(),
                source_service: ServiceKind::Sonarr.to_string(),
            })
        })
        .collect()
}

/// Merge events, returning how many rows were inserted or patched.
pub async fn merge_events(
    conn: &mut SqliteConnection,
    events: &[NewCalendarEvent],
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut changed = 0;
    for event in events {
        if calendar::merge_event(conn, event, now).await? != CalendarMerge::Unchanged {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Drop `service`'s events that fell out of the window since the last pass.
pub async fn prune_outside(
    conn: &mut SqliteConnection,
    service: ServiceKind,
    window: CalendarWindow,
) -> Result<u64> {
    calendar::delete_outside(conn, service.as_str(), window.start, window.end).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> CalendarWindow {
        CalendarWindow {
            start: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
        }
    }

    #[test]
    fn test_movie_events_inside_window() {
        let entries: Vec<RadarrCalendarEntry> = serde_json::from_str(
            r#"[{"title": "Dune", "inCinemas": "2025-03-01T00:00:00Z", "physicalRelease": "2025-06-01T00:00:00Z",
                 "images": [{"coverType": "poster", "remoteUrl": "https://img/d.jpg"}]}]"#,
        )
        .unwrap();
        let events = movie_events(&entries, window());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "cinema");
        assert_eq!(events[0].image_url.as_deref(), Some("https://img/d.jpg"));
    }

    #[test]
    fn test_episode_without_series_gets_placeholder() {
        let entries: Vec<SonarrCalendarEntry> = serde_json::from_str(
            r#"[{"seasonNumber": 1, "episodeNumber": 2, "airDateUtc": "2025-03-10T01:00:00Z"},
                {"seasonNumber": 1, "episodeNumber": 3}]"#,
        )
        .unwrap();
        let events = episode_events(&entries, window());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, PLACEHOLDER_TITLE);
        assert_eq!(events[0].episode_label.as_deref(), Some("S01E02"));
    }
}
