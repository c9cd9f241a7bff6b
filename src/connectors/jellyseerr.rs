use super::http::{ApiClient, KeyPlacement};
use super::{parse_logged, ServiceKind};
use crate::db::requests::RequestUpsert;
use crate::error::Result;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub results: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMedia {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JellyseerrRequest {
    pub id: i64,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub media: Option<RequestMedia>,
    #[serde(default)]
    pub requested_by: Option<RequestUser>,
    #[serde(default)]
    pub is4k: bool,
    #[serde(default)]
    pub seasons: Vec<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPage {
    pub page_info: PageInfo,
    #[serde(default)]
    pub results: Vec<JellyseerrRequest>,
}

pub fn request_status_label(status: i64) -> &'static str {
    match status {
        1 => "pending",
        2 => "approved",
        3 => "declined",
        4 => "failed",
        5 => "completed",
        _ => "unknown",
    }
}

pub fn media_status_label(status: i64) -> &'static str {
    match status {
        1 => "unknown",
        2 => "pending",
        3 => "processing",
        4 => "partially_available",
        5 => "available",
        6 => "deleted",
        _ => "unknown",
    }
}

impl JellyseerrRequest {
    pub fn into_upsert(self) -> RequestUpsert {
        let media = self.media.as_ref();
        let media_type = media
            .and_then(|m| m.media_type.clone())
            .or_else(|| self.r#type.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let requested_by = self.requested_by.as_ref().and_then(|u| {
            u.display_name
                .clone()
                .or_else(|| u.username.clone())
                .or_else(|| u.email.clone())
        });

        RequestUpsert {
            jellyseerr_id: self.id,
            media_type,
            tmdb_id: media.and_then(|m| m.tmdb_id),
            title: media.and_then(|m| m.title.clone()),
            status: request_status_label(self.status).to_string(),
            media_status: media
                .and_then(|m| m.status)
                .map(|s| media_status_label(s).to_string()),
            requested_by,
            is_4k: self.is4k,
            season_count: self.seasons.len() as i64,
            requested_at: parse_logged(
                ServiceKind::Jellyseerr,
                "createdAt",
                self.created_at.as_deref(),
            ),
            upstream_updated_at: parse_logged(
                ServiceKind::Jellyseerr,
                "updatedAt",
                self.updated_at.as_deref(),
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Status {
    #[serde(default)]
    version: Option<String>,
}

/// Jellyseerr API client.
#[derive(Debug, Clone)]
pub struct JellyseerrClient {
    api: ApiClient,
}

impl JellyseerrClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                ServiceKind::Jellyseerr,
                base_url,
                api_key,
                KeyPlacement::Header("X-Api-Key"),
            )?,
        })
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let status: Status = self.api.get_json("/api/v1/status", &[]).await?;
        Ok(status.version)
    }

    pub async fn request_page(&self, take: u32, skip: u32) -> Result<RequestPage> {
        self.api
            .get_json(
                "/api/v1/request",
                &[
                    ("take", take.to_string()),
                    ("skip", skip.to_string()),
                    ("filter", "all".to_string()),
                    ("sort", "added".to_string()),
                ],
            )
            .await
    }

    /// Every request, following page info until the last page.
    pub async fn all_requests(&self, page_size: u32) -> Result<Vec<JellyseerrRequest>> {
        let take = page_size.max(1);
        let mut skip = 0;
        let mut requests = Vec::new();

        loop {
            let page = self.request_page(take, skip).await?;
            let fetched = page.results.len() as u32;
            requests.extend(page.results);
            debug!(
                page = page.page_info.page,
                pages = page.page_info.pages,
                fetched,
                "Fetched Jellyseerr request page"
            );

            if fetched < take || page.page_info.page >= page.page_info.pages {
                break;
            }
            skip += take;
        }

        Ok(requests)
    }

    pub async fn approve_request(&self, request_id: i64) -> Result<()> {
        let path = format!("/api/v1/request/{}/approve", request_id);
        self.api
            .send_empty::<serde_json::Value>(Method::POST, &path, None)
            .await
    }

    pub async fn decline_request(&self, request_id: i64) -> Result<()> {
        let path = format!("/api/v1/request/{}/decline", request_id);
        self.api
            .send_empty::<serde_json::Value>(Method::POST, &path, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_page_fixture() {
        let raw = r#"{
            "pageInfo": {"pages": 1, "pageSize": 10, "results": 2, "page": 1},
            "results": [
                {"id": 7, "status": 2, "type": "tv", "is4k": false,
                 "media": {"mediaType": "tv", "tmdbId": 95396, "status": 4},
                 "requestedBy": {"displayName": "alice"},
                 "seasons": [{"seasonNumber": 1}, {"seasonNumber": 2}],
                 "createdAt": "2025-01-05T10:00:00.000Z", "updatedAt": "2025-01-06T10:00:00.000Z"},
                {"id": 8, "status": 1, "media": {"mediaType": "movie", "tmdbId": 603}}
            ]
        }"#;
        let page: RequestPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.page_info.pages, 1);
        let mut rows: Vec<RequestUpsert> = page.results.into_iter().map(|r| r.into_upsert()).collect();

        let movie = rows.pop().unwrap();
        assert_eq!(movie.jellyseerr_id, 8);
        assert_eq!(movie.status, "pending");
        assert_eq!(movie.media_type, "movie");
        assert_eq!(movie.requested_by, None);

        let show = rows.pop().unwrap();
        assert_eq!(show.status, "approved");
        assert_eq!(show.media_status.as_deref(), Some("partially_available"));
        assert_eq!(show.season_count, 2);
        assert_eq!(show.requested_by.as_deref(), Some("alice"));
        assert!(show.requested_at.is_some());
    }
}
