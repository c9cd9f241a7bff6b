//! Alerts for failed sync passes, posted to a generic JSON webhook and/or a
//! Discord webhook. Delivery problems are reported back to the caller but
//! never fail the pass itself.

use crate::config::NotificationsConfig;
use crate::connectors::http::build_client;
use crate::connectors::ServiceKind;
use crate::error::{ArrboardError, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const FAILURE_COLOR: u32 = 0xE74C3C;

/// A destination configured under `[notifications]`.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Generic(String),
    Discord(String),
}

impl Target {
    fn url(&self) -> &str {
        match self {
            Target::Generic(url) | Target::Discord(url) => url,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Target::Generic(_) => "webhook",
            Target::Discord(_) => "discord",
        }
    }

    fn body(&self, alert: &SyncFailure) -> Value {
        match self {
            Target::Generic(_) => json!({
                "event": "sync_failed",
                "service": alert.service,
                "error": alert.error,
                "source": "arrboard",
                "timestamp": alert.at.to_rfc3339(),
            }),
            Target::Discord(_) => json!({
                "username": "arrboard",
                "embeds": [{
                    "title": format!("{} sync failed", alert.service),
                    "description": alert.error,
                    "color": FAILURE_COLOR,
                    "timestamp": alert.at.to_rfc3339(),
                }],
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct SyncFailure<'a> {
    service: ServiceKind,
    error: &'a str,
    at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationService {
    targets: Vec<Target>,
    on_sync_failure: bool,
    http: Option<reqwest::Client>,
}

impl NotificationService {
    pub fn new(config: NotificationsConfig) -> Self {
        let mut targets = Vec::new();
        if config.enabled {
            targets.extend(config.webhook_url.map(Target::Generic));
            targets.extend(config.discord_webhook.map(Target::Discord));
        }
        // A client that fails to build leaves the service silent.
        let http = match build_client(false) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "Notifications disabled: HTTP client unavailable");
                None
            }
        };

        Self {
            targets,
            on_sync_failure: config.notify_on_sync_failure,
            http,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.targets.is_empty() && self.http.is_some()
    }

    /// Post a failure alert to every target. Each target is tried even if an
    /// earlier one fails; the returned error lists all that did.
    pub async fn notify_sync_failed(&self, service: ServiceKind, error: &str) -> Result<()> {
        if !self.on_sync_failure {
            return Ok(());
        }
        let Some(http) = self.http.as_ref() else {
            return Ok(());
        };

        let alert = SyncFailure {
            service,
            error,
            at: Utc::now(),
        };
        let mut failures = Vec::new();
        for target in &self.targets {
            match post(http, target.url(), &target.body(&alert)).await {
                Ok(()) => debug!(target = target.label(), %service, "Notification sent"),
                Err(e) => failures.push(format!("{}: {}", target.label(), e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ArrboardError::Notification(failures.join(", ")))
        }
    }
}

async fn post(http: &reqwest::Client, url: &str, body: &Value) -> std::result::Result<(), String> {
    let response = http
        .post(url)
        .json(body)
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    match response.status() {
        status if status.is_success() => Ok(()),
        status => Err(format!("endpoint returned {}", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(webhook: Option<&str>, discord: Option<&str>) -> NotificationsConfig {
        NotificationsConfig {
            enabled: true,
            webhook_url: webhook.map(String::from),
            discord_webhook: discord.map(String::from),
            notify_on_sync_failure: true,
        }
    }

    #[tokio::test]
    async fn test_disabled_service_sends_nothing() {
        let service = NotificationService::new(NotificationsConfig {
            enabled: false,
            ..config(Some("http://127.0.0.1:9/hook"), None)
        });
        assert!(!service.is_enabled());
        assert!(service
            .notify_sync_failed(ServiceKind::Radarr, "boom")
            .await
            .is_ok());
    }

    #[test]
    fn test_enabled_requires_a_target() {
        let service = NotificationService::new(config(None, None));
        assert!(!service.is_enabled());

        let service = NotificationService::new(config(None, Some("https://discord/x")));
        assert!(service.is_enabled());
        assert_eq!(service.targets, vec![Target::Discord("https://discord/x".into())]);
    }

    #[test]
    fn test_bodies_per_target() {
        let alert = SyncFailure {
            service: ServiceKind::Sonarr,
            error: "connection refused",
            at: Utc::now(),
        };

        let generic = Target::Generic("http://hook".into()).body(&alert);
        assert_eq!(generic["event"], "sync_failed");
        assert_eq!(generic["service"], "sonarr");
        assert_eq!(generic["error"], "connection refused");

        let discord = Target::Discord("http://discord".into()).body(&alert);
        assert_eq!(discord["embeds"][0]["title"], "sonarr sync failed");
        assert_eq!(discord["embeds"][0]["description"], "connection refused");
    }

    #[tokio::test]
    async fn test_unreachable_targets_are_all_reported() {
        let service = NotificationService::new(config(
            Some("http://127.0.0.1:9/hook"),
            Some("http://127.0.0.1:9/discord"),
        ));
        let err = service
            .notify_sync_failed(ServiceKind::Radarr, "boom")
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("webhook:"));
        assert!(err.contains("discord:"));
    }
}
