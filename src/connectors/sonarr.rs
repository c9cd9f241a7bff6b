use super::http::{ApiClient, KeyPlacement};
use super::radarr::HistoryPage;
use super::{parse_logged, ServiceKind};
use crate::db::stats::MonitoredCounts;
use crate::error::Result;
use crate::format::{select_poster, MediaImage};
use crate::torrents::HistoryRecord;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesStatistics {
    #[serde(default)]
    pub size_on_disk: i64,
    #[serde(default)]
    pub episode_file_count: i64,
    #[serde(default)]
    pub episode_count: i64,
    #[serde(default)]
    pub total_episode_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrSeries {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i64,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub images: Vec<MediaImage>,
    #[serde(default)]
    pub statistics: SeriesStatistics,
}

impl SonarrSeries {
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        parse_logged(ServiceKind::Sonarr, "added", self.added.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRef {
    #[serde(default)]
    pub season_number: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrHistoryRecord {
    pub series_id: i64,
    #[serde(default)]
    pub episode_id: Option<i64>,
    #[serde(default)]
    pub download_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub episode: Option<EpisodeRef>,
}

impl SonarrHistoryRecord {
    pub fn into_record(self) -> HistoryRecord {
        HistoryRecord {
            entity_id: self.series_id,
            episode_id: self.episode_id.filter(|id| *id > 0),
            season_number: self.episode.and_then(|e| e.season_number),
            date: parse_logged(ServiceKind::Sonarr, "history.date", self.date.as_deref()),
            download_id: self.download_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarSeries {
    pub title: String,
    #[serde(default)]
    pub images: Vec<MediaImage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SonarrCalendarEntry {
    #[serde(default)]
    pub season_number: i64,
    #[serde(default)]
    pub episode_number: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub air_date_utc: Option<String>,
    #[serde(default)]
    pub air_date: Option<String>,
    #[serde(default)]
    pub series: Option<CalendarSeries>,
}

impl SonarrCalendarEntry {
    pub fn air_date(&self) -> Option<NaiveDate> {
        parse_logged(
            ServiceKind::Sonarr,
            "airDate",
            self.air_date_utc.as_deref().or(self.air_date.as_deref()),
        )
        .map(|dt| dt.date_naive())
    }

    pub fn episode_label(&self) -> String {
        format!("S{:02}E{:02}", self.season_number, self.episode_number)
    }

    pub fn series_title(&self) -> Option<&str> {
        self.series
            .as_ref()
            .map(|s| s.title.as_str())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn image_url(&self) -> Option<String> {
        self.series.as_ref().and_then(|s| select_poster(&s.images))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SystemStatus {
    #[serde(default)]
    version: Option<String>,
}

/// Sonarr v3 API client.
#[derive(Debug, Clone)]
pub struct SonarrClient {
    api: ApiClient,
}

impl SonarrClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                ServiceKind::Sonarr,
                base_url,
                api_key,
                KeyPlacement::Header("X-Api-Key"),
            )?,
        })
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let status: SystemStatus = self.api.get_json("/api/v3/system/status", &[]).await?;
        Ok(status.version)
    }

    pub async fn series(&self) -> Result<Vec<SonarrSeries>> {
        self.api.get_json("/api/v3/series", &[]).await
    }

    pub async fn history_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage<SonarrHistoryRecord>> {
        self.api
            .get_json(
                "/api/v3/history",
                &[
                    ("page", page.to_string()),
                    ("pageSize", page_size.to_string()),
                    ("sortKey", "date".to_string()),
                    ("sortDirection", "descending".to_string()),
                    ("eventType", "1".to_string()),
                    ("includeEpisode", "true".to_string()),
                ],
            )
            .await
    }

    pub async fn recent_history(&self, page_size: u32) -> Result<Vec<HistoryRecord>> {
        let page = self.history_page(1, page_size).await?;
        Ok(page
            .records
            .into_iter()
            .map(SonarrHistoryRecord::into_record)
            .collect())
    }

    pub async fn calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SonarrCalendarEntry>> {
        self.api
            .get_json(
                "/api/v3/calendar",
                &[
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                    ("includeSeries", "true".to_string()),
                ],
            )
            .await
    }

    pub async fn monitor_episodes(&self, episode_ids: &[i64], monitored: bool) -> Result<()> {
        let body = json!({ "episodeIds": episode_ids, "monitored": monitored });
        self.api
            .send_empty(Method::PUT, "/api/v3/episode/monitor", Some(&body))
            .await
    }

    pub async fn search_episodes(&self, episode_ids: &[i64]) -> Result<()> {
        let body = json!({ "name": "EpisodeSearch", "episodeIds": episode_ids });
        self.api
            .send_empty(Method::POST, "/api/v3/command", Some(&body))
            .await
    }

    pub fn monitored_counts(series: &[SonarrSeries]) -> MonitoredCounts {
        MonitoredCounts {
            total: series.len() as i64,
            monitored: series.iter().filter(|s| s.monitored).count() as i64,
            downloaded: series
                .iter()
                .filter(|s| s.statistics.episode_file_count > 0)
                .count() as i64,
        }
    }
}
