//! Clients for the upstream services.
//!
//! Each client turns its service's wire format into the typed records the sync
//! passes consume. The set of services is closed: `Connector` has one variant
//! per client and dispatch is a plain `match`.

pub mod http;
pub mod jellyfin;
pub mod jellyseerr;
pub mod prowlarr;
pub mod qbittorrent;
pub mod radarr;
pub mod sonarr;

pub use jellyfin::JellyfinClient;
pub use jellyseerr::JellyseerrClient;
pub use prowlarr::ProwlarrClient;
pub use qbittorrent::QbittorrentClient;
pub use radarr::RadarrClient;
pub use sonarr::SonarrClient;

use crate::config::ServicesConfig;
use crate::error::{ArrboardError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Radarr,
    Sonarr,
    Jellyfin,
    Jellyseerr,
    Qbittorrent,
    Prowlarr,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Radarr,
        ServiceKind::Sonarr,
        ServiceKind::Jellyfin,
        ServiceKind::Jellyseerr,
        ServiceKind::Qbittorrent,
        ServiceKind::Prowlarr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Radarr => "radarr",
            ServiceKind::Sonarr => "sonarr",
            ServiceKind::Jellyfin => "jellyfin",
            ServiceKind::Jellyseerr => "jellyseerr",
            ServiceKind::Qbittorrent => "qbittorrent",
            ServiceKind::Prowlarr => "prowlarr",
        }
    }

    /// Services that have a sync pass of their own.
    pub fn is_syncable(&self) -> bool {
        matches!(
            self,
            ServiceKind::Radarr | ServiceKind::Sonarr | ServiceKind::Jellyfin | ServiceKind::Jellyseerr
        )
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ArrboardError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ServiceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ArrboardError::Config(format!("unknown service '{}'", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTest {
    pub service: ServiceKind,
    pub ok: bool,
    pub version: Option<String>,
    pub message: String,
}

impl ConnectionTest {
    pub fn success(service: ServiceKind, version: Option<String>) -> Self {
        Self {
            service,
            ok: true,
            message: match &version {
                Some(v) => format!("Connected to {} {}", service, v),
                None => format!("Connected to {}", service),
            },
            version,
        }
    }

    pub fn failure(service: ServiceKind, error: &ArrboardError) -> Self {
        Self {
            service,
            ok: false,
            version: None,
            message: error.to_string(),
        }
    }
}

/// Parse an upstream timestamp: RFC 3339, or a bare date taken as midnight UTC.
pub fn parse_upstream_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

/// Like `parse_upstream_date`, but logs what it had to drop.
pub(crate) fn parse_logged(service: ServiceKind, field: &str, raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_upstream_date(raw);
    if parsed.is_none() {
        warn!(service = %service, field, value = raw, "Ignoring unparseable date");
    }
    parsed
}

#[derive(Debug, Clone)]
pub enum Connector {
    Radarr(RadarrClient),
    Sonarr(SonarrClient),
    Jellyfin(JellyfinClient),
    Jellyseerr(JellyseerrClient),
    Qbittorrent(QbittorrentClient),
    Prowlarr(ProwlarrClient),
}

impl Connector {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Connector::Radarr(_) => ServiceKind::Radarr,
            Connector::Sonarr(_) => ServiceKind::Sonarr,
            Connector::Jellyfin(_) => ServiceKind::Jellyfin,
            Connector::Jellyseerr(_) => ServiceKind::Jellyseerr,
            Connector::Qbittorrent(_) => ServiceKind::Qbittorrent,
            Connector::Prowlarr(_) => ServiceKind::Prowlarr,
        }
    }

    /// Never fails: an unreachable service is reported, not raised.
    pub async fn test_connection(&self) -> ConnectionTest {
        let kind = self.kind();
        let version = match self {
            Connector::Radarr(c) => c.version().await,
            Connector::Sonarr(c) => c.version().await,
            Connector::Jellyfin(c) => c.version().await,
            Connector::Jellyseerr(c) => c.version().await,
            Connector::Qbittorrent(c) => c.version().await,
            Connector::Prowlarr(c) => c.version().await,
        };
        match version {
            Ok(version) => ConnectionTest::success(kind, version),
            Err(e) => {
                warn!(service = %kind, error = %e, "Connection test failed");
                ConnectionTest::failure(kind, &e)
            }
        }
    }
}

/// Every configured and enabled service client.
#[derive(Debug, Clone, Default)]
pub struct Connectors {
    pub radarr: Option<RadarrClient>,
    pub sonarr: Option<SonarrClient>,
    pub jellyfin: Option<JellyfinClient>,
    pub jellyseerr: Option<JellyseerrClient>,
    pub qbittorrent: Option<QbittorrentClient>,
    pub prowlarr: Option<ProwlarrClient>,
}

impl Connectors {
    pub fn from_config(services: &ServicesConfig) -> Result<Self> {
        let enabled = |c: &crate::config::ApiServiceConfig| c.enabled && !c.url.is_empty();

        Ok(Self {
            radarr: match services.radarr.as_ref().filter(|c| enabled(*c)) {
                Some(c) => Some(RadarrClient::new(&c.url, &c.api_key)?),
                None => None,
            },
            sonarr: match services.sonarr.as_ref().filter(|c| enabled(*c)) {
                Some(c) => Some(SonarrClient::new(&c.url, &c.api_key)?),
                None => None,
            },
            jellyfin: match services.jellyfin.as_ref().filter(|c| enabled(*c)) {
                Some(c) => Some(JellyfinClient::new(&c.url, &c.api_key)?),
                None => None,
            },
            jellyseerr: match services.jellyseerr.as_ref().filter(|c| enabled(*c)) {
                Some(c) => Some(JellyseerrClient::new(&c.url, &c.api_key)?),
                None => None,
            },
            qbittorrent: match services
                .qbittorrent
                .as_ref()
                .filter(|c| c.enabled && !c.url.is_empty())
            {
                Some(c) => Some(QbittorrentClient::new(&c.url, &c.username, &c.password)?),
                None => None,
            },
            prowlarr: match services.prowlarr.as_ref().filter(|c| enabled(*c)) {
                Some(c) => Some(ProwlarrClient::new(&c.url, &c.api_key)?),
                None => None,
            },
        })
    }

    pub fn get(&self, kind: ServiceKind) -> Option<Connector> {
        match kind {
            ServiceKind::Radarr => self.radarr.clone().map(Connector::Radarr),
            ServiceKind::Sonarr => self.sonarr.clone().map(Connector::Sonarr),
            ServiceKind::Jellyfin => self.jellyfin.clone().map(Connector::Jellyfin),
            ServiceKind::Jellyseerr => self.jellyseerr.clone().map(Connector::Jellyseerr),
            ServiceKind::Qbittorrent => self.qbittorrent.clone().map(Connector::Qbittorrent),
            ServiceKind::Prowlarr => self.prowlarr.clone().map(Connector::Prowlarr),
        }
    }

    pub fn configured(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }

    pub async fn test(&self, kind: ServiceKind) -> Result<ConnectionTest> {
        let connector = self.get(kind).ok_or(ArrboardError::NotConfigured(kind))?;
        Ok(connector.test_connection().await)
    }

    pub async fn test_all(&self) -> Vec<ConnectionTest> {
        let tests = self
            .configured()
            .into_iter()
            .filter_map(|kind| self.get(kind))
            .map(|connector| async move { connector.test_connection().await });
        futures::future::join_all(tests).await
    }
}
