use super::http::{ApiClient, KeyPlacement};
use super::{parse_logged, ServiceKind};
use crate::db::stats::MonitoredCounts;
use crate::error::Result;
use crate::format::MediaImage;
use crate::torrents::HistoryRecord;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarrMovie {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i64,
    #[serde(default)]
    pub added: Option<String>,
    #[serde(default)]
    pub size_on_disk: i64,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default)]
    pub monitored: bool,
    #[serde(default)]
    pub images: Vec<MediaImage>,
    #[serde(default)]
    pub movie_file: Option<MovieFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieFile {
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub quality: Option<QualityModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityModel {
    pub quality: Quality,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Quality {
    pub name: String,
}

impl RadarrMovie {
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        parse_logged(ServiceKind::Radarr, "added", self.added.as_deref())
    }

    /// File size when known, otherwise whatever Radarr reports on disk.
    pub fn size_bytes(&self) -> i64 {
        self.movie_file
            .as_ref()
            .map(|f| f.size)
            .filter(|s| *s > 0)
            .unwrap_or(self.size_on_disk)
    }

    pub fn quality_name(&self) -> Option<String> {
        self.movie_file
            .as_ref()
            .and_then(|f| f.quality.as_ref())
            .map(|q| q.quality.name.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage<T> {
    #[serde(default)]
    pub total_records: i64,
    #[serde(default = "Vec::new")]
    pub records: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarrHistoryRecord {
    pub movie_id: i64,
    #[serde(default)]
    pub download_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl RadarrHistoryRecord {
    pub fn into_record(self) -> HistoryRecord {
        HistoryRecord {
            entity_id: self.movie_id,
            episode_id: None,
            season_number: None,
            date: parse_logged(ServiceKind::Radarr, "history.date", self.date.as_deref()),
            download_id: self.download_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarrCalendarEntry {
    pub title: String,
    #[serde(default)]
    pub in_cinemas: Option<String>,
    #[serde(default)]
    pub physical_release: Option<String>,
    #[serde(default)]
    pub digital_release: Option<String>,
    #[serde(default)]
    pub images: Vec<MediaImage>,
}

impl RadarrCalendarEntry {
    /// Every (date, release type) this entry announces.
    pub fn releases(&self) -> Vec<(NaiveDate, &'static str)> {
        [
            (self.in_cinemas.as_deref(), "cinema"),
            (self.digital_release.as_deref(), "digital"),
            (self.physical_release.as_deref(), "physical"),
        ]
        .into_iter()
        .filter_map(|(raw, kind)| {
            parse_logged(ServiceKind::Radarr, kind, raw).map(|dt| (dt.date_naive(), kind))
        })
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SystemStatus {
    #[serde(default)]
    version: Option<String>,
}

/// Radarr v3 API client.
#[derive(Debug, Clone)]
pub struct RadarrClient {
    api: ApiClient,
}

impl RadarrClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                ServiceKind::Radarr,
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

    pub async fn movies(&self) -> Result<Vec<RadarrMovie>> {
        self.api.get_json("/api/v3/movie", &[]).await
    }

    pub async fn history_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<HistoryPage<RadarrHistoryRecord>> {
        self.api
            .get_json(
                "/api/v3/history",
                &[
                    ("page", page.to_string()),
                    ("pageSize", page_size.to_string()),
                    ("sortKey", "date".to_string()),
                    ("sortDirection", "descending".to_string()),
                    ("eventType", "1".to_string()),
                ],
            )
            .await
    }

    /// Most recent grabs, newest first.
    pub async fn recent_history(&self, page_size: u32) -> Result<Vec<HistoryRecord>> {
        let page = self.history_page(1, page_size).await?;
        Ok(page
            .records
            .into_iter()
            .map(RadarrHistoryRecord::into_record)
            .collect())
    }

    pub async fn calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RadarrCalendarEntry>> {
        self.api
            .get_json(
                "/api/v3/calendar",
                &[("start", start.to_string()), ("end", end.to_string())],
            )
            .await
    }

    pub async fn search_movies(&self, movie_ids: &[i64]) -> Result<()> {
        let body = json!({ "name": "MoviesSearch", "movieIds": movie_ids });
        self.api
            .send_empty(Method::POST, "/api/v3/command", Some(&body))
            .await
    }

    pub fn monitored_counts(movies: &[RadarrMovie]) -> MonitoredCounts {
        MonitoredCounts {
            total: movies.len() as i64,
            monitored: movies.iter().filter(|m| m.monitored).count() as i64,
            downloaded: movies.iter().filter(|m| m.has_file).count() as i64,
        }
    }
}
