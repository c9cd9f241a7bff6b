use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Webhook bodies larger than this are always rejected, whatever the config says.
pub const MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub services: ServicesConfig,
    pub sync: SyncConfig,
    pub metrics: MetricsConfig,
    pub analytics: AnalyticsConfig,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub database_path: String,
    /// Required as `X-Api-Key` on `/api` and as the `api_key` query parameter on webhooks.
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_rate_limit_per_minute: u32,
    pub max_webhook_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8095".to_string(),
            database_path: "arrboard.db".to_string(),
            api_key: None,
            webhook_secret: None,
            webhook_rate_limit_per_minute: 60,
            max_webhook_body_bytes: MAX_WEBHOOK_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn webhook_body_limit(&self) -> usize {
        self.max_webhook_body_bytes.clamp(1, MAX_WEBHOOK_BODY_BYTES)
    }
}

/// Connection settings for an API-key authenticated service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiServiceConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// qBittorrent uses a cookie session instead of an API key.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QbittorrentConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServicesConfig {
    pub radarr: Option<ApiServiceConfig>,
    pub sonarr: Option<ApiServiceConfig>,
    pub jellyfin: Option<ApiServiceConfig>,
    pub jellyseerr: Option<ApiServiceConfig>,
    pub prowlarr: Option<ApiServiceConfig>,
    pub qbittorrent: Option<QbittorrentConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_minutes: u64,
    /// Upstream movies/series added longer ago than this are not mirrored locally.
    pub recent_days: i64,
    pub history_page_size: u32,
    pub calendar_days_behind: i64,
    pub calendar_days_ahead: i64,
    pub request_page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            recent_days: 90,
            history_page_size: 250,
            calendar_days_behind: 7,
            calendar_days_ahead: 30,
            request_page_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub capture_interval_seconds: u64,
    pub retention_days: i64,
    pub cleanup_interval_minutes: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capture_interval_seconds: 60,
            retention_days: 7,
            cleanup_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub orphan_timeout_hours: i64,
    /// Fraction of the runtime a session must cover to count as watched.
    pub watched_threshold: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            orphan_timeout_hours: 24,
            watched_threshold: 0.30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub discord_webhook: Option<String>,
    pub notify_on_sync_failure: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"
            [server]
            api_key = "k"

            [services.radarr]
            url = "http://radarr:7878"
            api_key = "abc"

            [sync]
            interval_minutes = 5
        "#;
        let config: Config = match toml::from_str(raw) {
            Ok(config) => config,
            Err(e) => panic!("config should parse: {}", e),
        };

        assert_eq!(config.server.api_key.as_deref(), Some("k"));
        assert_eq!(config.server.bind, "0.0.0.0:8095");
        assert_eq!(config.sync.interval_minutes, 5);
        assert_eq!(config.sync.recent_days, 90);
        assert!(config.services.radarr.as_ref().map(|r| r.enabled).unwrap_or(false));
        assert!(config.services.sonarr.is_none());
        assert_eq!(config.analytics.orphan_timeout_hours, 24);
    }

    #[test]
    fn test_webhook_body_limit_is_capped() {
        let server = ServerConfig {
            max_webhook_body_bytes: 10 * 1024 * 1024,
            ..ServerConfig::default()
        };
        assert_eq!(server.webhook_body_limit(), MAX_WEBHOOK_BODY_BYTES);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = match Config::load(Path::new("/nonexistent/arrboard.toml")) {
            Ok(config) => config,
            Err(e) => panic!("missing config should default: {}", e),
        };
        assert_eq!(config.metrics.retention_days, 7);
    }
}
