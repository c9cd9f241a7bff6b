//! qBittorrent Web API client (cookie session).

use super::http::{build_client, trim_base};
use super::ServiceKind;
use crate::error::{ArrboardError, Result};
use crate::torrents::{TorrentSource, TorrentState, TorrentStatus};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

/// Hashes per `torrents/info` request, keeps the query string bounded.
const HASHES_PER_REQUEST: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct QbitTorrent {
    pub hash: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Fraction, 0.0-1.0.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub ratio: Option<f64>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub seeding_time: Option<i64>,
    /// Unix seconds; zero or negative while incomplete.
    #[serde(default)]
    pub completion_on: Option<i64>,
}

impl QbitTorrent {
    pub fn into_state(self) -> TorrentState {
        TorrentState {
            hash: self.hash.to_ascii_uppercase(),
            name: self.name,
            status: self.state.as_deref().map(TorrentStatus::from_client_state),
            raw_state: self.state,
            progress: self.progress.map(|p| (p * 1000.0).round() / 10.0),
            ratio: self.ratio,
            size: self.size,
            seeding_time: self.seeding_time,
            completed_on: self
                .completion_on
                .filter(|ts| *ts > 0)
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QbittorrentClient {
    base_url: String,
    username: String,
    password: String,
    http: reqwest::Client,
}

impl QbittorrentClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        Ok(Self {
            base_url: trim_base(base_url),
            username: username.to_string(),
            password: password.to_string(),
            http: build_client(true)?,
        })
    }

    fn upstream(message: impl Into<String>) -> ArrboardError {
        ArrboardError::upstream(ServiceKind::Qbittorrent, message)
    }

    pub async fn login(&self) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/v2/auth/login", self.base_url))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::upstream(format!("login: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(Self::upstream(format!("login rejected ({})", status)));
        }

        info!("Logged in to qBittorrent");
        Ok(())
    }

    /// GET with the session cookie, logging in again once on 403.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempts = 0;

        loop {
            let response = self
                .http
                .get(&url)
                .query(query)
                .send()
                .await
                .map_err(|e| Self::upstream(format!("{}: {}", path, e)))?;

            match response.status() {
                StatusCode::FORBIDDEN if attempts == 0 => {
                    debug!("qBittorrent session missing or expired");
                    attempts += 1;
                    self.login().await?;
                }
                status if status.is_success() => return Ok(response),
                status => return Err(Self::upstream(format!("{} returned {}", path, status))),
            }
        }
    }

    pub async fn version(&self) -> Result<Option<String>> {
        let response = self.get("/api/v2/app/version", &[]).await?;
        let version = response
            .text()
            .await
            .map_err(|e| Self::upstream(e.to_string()))?;
        Ok(Some(version.trim().to_string()).filter(|v| !v.is_empty()))
    }

    pub async fn torrents_info(&self, hashes: &[String]) -> Result<Vec<QbitTorrent>> {
        let mut torrents = Vec::new();
        for chunk in hashes.chunks(HASHES_PER_REQUEST) {
            let joined = chunk
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join("|");
            let response = self
                .get("/api/v2/torrents/info", &[("hashes", joined)])
                .await?;
            let batch: Vec<QbitTorrent> = response
                .json()
                .await
                .map_err(|e| Self::upstream(format!("torrents/info: invalid response: {}", e)))?;
            torrents.extend(batch);
        }
        Ok(torrents)
    }
}

#[async_trait]
impl TorrentSource for QbittorrentClient {
    async fn fetch_states(&self, hashes: &[String]) -> Result<Vec<TorrentState>> {
        let torrents = self.torrents_info(hashes).await?;
        Ok(torrents.into_iter().map(QbitTorrent::into_state).collect())
    }
}
