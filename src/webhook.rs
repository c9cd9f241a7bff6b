//! Inbound playback webhook.
//!
//! Every request needs the configured API key as the `api_key` query parameter
//! and either the shared secret in `X-Webhook-Secret` or an HMAC-SHA256 of the
//! raw body in `X-Webhook-Signature: sha256=<hex>`. Validation happens before
//! anything touches the database.

use crate::analytics::{EventKind, EventOutcome, PlaybackEvent, QualityHint};
use crate::db::sessions::PlaybackMediaType;
use crate::error::ArrboardError;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

const TICKS_PER_SECOND: i64 = 10_000_000;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("webhook authentication is not configured")]
    NotConfigured,
    #[error("missing or invalid api key")]
    InvalidApiKey,
    #[error("missing webhook secret or signature")]
    MissingSecret,
    #[error("invalid webhook secret or signature")]
    InvalidSecret,
    #[error("payload exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("invalid {0} id")]
    InvalidId(&'static str),
    #[error(transparent)]
    Internal(#[from] ArrboardError),
}

impl WebhookRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookRejection::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            WebhookRejection::InvalidApiKey
            | WebhookRejection::MissingSecret
            | WebhookRejection::InvalidSecret => StatusCode::UNAUTHORIZED,
            WebhookRejection::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            WebhookRejection::Malformed(_)
            | WebhookRejection::MissingField(_)
            | WebhookRejection::InvalidId(_) => StatusCode::BAD_REQUEST,
            WebhookRejection::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Webhook failed");
        } else {
            warn!(status = status.as_u16(), reason = %self, "Webhook rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Per-address request budget. Lives in memory only, so a restart resets it.
pub struct WebhookGuard {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
}

impl WebhookGuard {
    pub fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, addr: IpAddr) -> Result<(), WebhookRejection> {
        self.limiter
            .check_key(&addr)
            .map_err(|_| WebhookRejection::RateLimited)
    }

    /// Drop state for addresses that are back to a full budget.
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

/// Check the query-parameter key and the secret or signature header.
pub fn authenticate(
    api_key: Option<&str>,
    webhook_secret: Option<&str>,
    query_key: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), WebhookRejection> {
    let (Some(api_key), Some(secret)) = (api_key, webhook_secret) else {
        return Err(WebhookRejection::NotConfigured);
    };

    match query_key {
        Some(given) if constant_time_eq(given.as_bytes(), api_key.as_bytes()) => {}
        _ => return Err(WebhookRejection::InvalidApiKey),
    }

    if let Some(given) = headers.get(SECRET_HEADER) {
        return if constant_time_eq(given.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(WebhookRejection::InvalidSecret)
        };
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .ok_or(WebhookRejection::MissingSecret)?
        .to_str()
        .map_err(|_| WebhookRejection::InvalidSecret)?;
    let hex_digest = signature.trim().strip_prefix("sha256=").unwrap_or(signature.trim());
    let expected = hex::decode(hex_digest).map_err(|_| WebhookRejection::InvalidSecret)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookRejection::NotConfigured)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookRejection::InvalidSecret)
}

/// Hex HMAC-SHA256 of `body`, as expected in the signature header.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Media and user ids are 32 hex characters; dashed UUIDs are accepted and
/// normalized to the bare lowercase form.
pub fn normalize_id(raw: &str) -> Option<String> {
    let compact: String = raw.trim().chars().filter(|c| *c != '-').collect();
    if compact.len() == 32 && compact.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(compact.to_ascii_lowercase())
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub media: Option<MediaPayload>,
    #[serde(default)]
    pub user: Option<UserPayload>,
    #[serde(default)]
    pub session: SessionPayload,
    #[serde(default)]
    pub watched_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaPayload {
    pub id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub runtime_seconds: Option<i64>,
    pub runtime_ticks: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserPayload {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionPayload {
    pub id: Option<String>,
    pub device_name: Option<String>,
    pub client: Option<String>,
    pub play_state: Option<String>,
    pub position_seconds: Option<i64>,
    pub position_ticks: Option<i64>,
    pub is_transcoding: bool,
    pub is_direct_play: bool,
    pub video: VideoPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VideoPayload {
    pub title: Option<String>,
    pub height: Option<i64>,
    pub is_hdr: bool,
}

fn seconds(explicit: Option<i64>, ticks: Option<i64>) -> Option<i64> {
    explicit.or_else(|| ticks.map(|t| t / TICKS_PER_SECOND))
}

fn media_type(raw: Option<&str>) -> PlaybackMediaType {
    match raw.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
        Some("movie") => PlaybackMediaType::Movie,
        Some("episode") | Some("tv") | Some("series") => PlaybackMediaType::Episode,
        _ => PlaybackMediaType::Other,
    }
}

impl WebhookPayload {
    pub fn into_event(self) -> Result<PlaybackEvent, WebhookRejection> {
        let media = self.media.ok_or(WebhookRejection::MissingField("media"))?;
        let user = self.user.ok_or(WebhookRejection::MissingField("user"))?;

        let raw_media_id = media
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(WebhookRejection::MissingField("media id"))?;
        let raw_user_id = user
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(WebhookRejection::MissingField("user id"))?;
        let media_id = normalize_id(raw_media_id).ok_or(WebhookRejection::InvalidId("media"))?;
        let user_id = normalize_id(raw_user_id).ok_or(WebhookRejection::InvalidId("user"))?;

        let kind = EventKind::parse(&self.event);
        let session = self.session;
        let position_seconds = seconds(session.position_seconds, session.position_ticks);

        // A stop reports where playback ended; that is the watched time unless
        // the sender gave one explicitly.
        let watched_seconds = match kind {
            EventKind::Stop => self.watched_seconds.or(position_seconds),
            _ => self.watched_seconds,
        };

        Ok(PlaybackEvent {
            kind,
            media_title: media.title.unwrap_or_else(|| "Unknown".to_string()),
            media_type: media_type(media.media_type.as_deref()),
            duration_seconds: seconds(media.runtime_seconds, media.runtime_ticks),
            media_id,
            user_id,
            user_name: user.name,
            session_key: session.id,
            device_name: session.device_name,
            client_name: session.client,
            is_transcoding: session.is_transcoding,
            is_direct_play: session.is_direct_play,
            quality: QualityHint {
                label: session.video.title,
                height: session.video.height,
                hdr: session.video.is_hdr,
            },
            position_seconds,
            watched_seconds,
        })
    }
}

pub async fn receive(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EventOutcome>, WebhookRejection> {
    let addr = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    state.webhook_guard.check(addr)?;

    let limit = state.config.server.webhook_body_limit();
    if body.len() > limit {
        return Err(WebhookRejection::PayloadTooLarge(limit));
    }

    authenticate(
        state.config.server.api_key.as_deref(),
        state.config.server.webhook_secret.as_deref(),
        query.api_key.as_deref(),
        &headers,
        &body,
    )?;

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| WebhookRejection::Malformed(e.to_string()))?;
    let event = payload.into_event()?;
    debug!(kind = ?event.kind, media = %event.media_id, "Webhook accepted");

    let outcome = state.reconciler.handle(&event).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const KEY: &str = "api-key";
    const SECRET: &str = "s3cret";

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_shared_secret_and_key_both_required() {
        let ok = headers(SECRET_HEADER, SECRET);
        assert!(authenticate(Some(KEY), Some(SECRET), Some(KEY), &ok, b"{}").is_ok());
        assert!(matches!(
            authenticate(Some(KEY), Some(SECRET), None, &ok, b"{}"),
            Err(WebhookRejection::InvalidApiKey)
        ));
        assert!(matches!(
            authenticate(Some(KEY), Some(SECRET), Some(KEY), &HeaderMap::new(), b"{}"),
            Err(WebhookRejection::MissingSecret)
        ));
        assert!(matches!(
            authenticate(Some(KEY), Some(SECRET), Some(KEY), &headers(SECRET_HEADER, "nope"), b"{}"),
            Err(WebhookRejection::InvalidSecret)
        ));
        assert!(matches!(
            authenticate(None, Some(SECRET), Some(KEY), &ok, b"{}"),
            Err(WebhookRejection::NotConfigured)
        ));
    }

    #[test]
    fn test_signature_over_body() {
        let body = br#"{"event":"play"}"#;
        let digest = sign(SECRET, body).unwrap();
        let signed = headers(SIGNATURE_HEADER, &format!("sha256={}", digest));
        assert!(authenticate(Some(KEY), Some(SECRET), Some(KEY), &signed, body).is_ok());
        assert!(matches!(
            authenticate(Some(KEY), Some(SECRET), Some(KEY), &signed, b"tampered"),
            Err(WebhookRejection::InvalidSecret)
        ));
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id(&"A".repeat(32)), Some("a".repeat(32)));
        assert_eq!(
            normalize_id("0123abcd-0123-abcd-0123-0123456789ab").as_deref(),
            Some("0123abcd0123abcd01230123456789ab")
        );
        assert_eq!(normalize_id("short"), None);
        assert_eq!(normalize_id(&"g".repeat(32)), None);
    }

    #[test]
    fn test_payload_validation() {
        let missing_user: WebhookPayload = serde_json::from_str(
            r#"{"event": "play", "media": {"id": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}}"#,
        )
        .unwrap();
        assert!(matches!(
            missing_user.into_event(),
            Err(WebhookRejection::MissingField("user"))
        ));

        let bad_id: WebhookPayload = serde_json::from_str(
            r#"{"event": "play", "media": {"id": "xyz"}, "user": {"id": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"}}"#,
        )
        .unwrap();
        assert!(matches!(bad_id.into_event(), Err(WebhookRejection::InvalidId("media"))));
    }

    #[test]
    fn test_stop_position_becomes_watched_time() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"event": "PlaybackStop",
                "media": {"id": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "title": "Arrival", "type": "Movie",
                          "runtime_ticks": 36000000000},
                "user": {"id": "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", "name": "alice"},
                "session": {"position_ticks": 27000000000, "client": "Jellyfin Web"}}"#,
        )
        .unwrap();
        let event = payload.into_event().unwrap();
        assert_eq!(event.kind, EventKind::Stop);
        assert_eq!(event.media_type, PlaybackMediaType::Movie);
        assert_eq!(event.duration_seconds, Some(3600));
        assert_eq!(event.position_seconds, Some(2700));
        assert_eq!(event.watched_seconds, Some(2700));
    }

    #[test]
    fn test_rate_limit_per_address() {
        let guard = WebhookGuard::new(2);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(guard.check(a).is_ok());
        assert!(guard.check(a).is_ok());
        assert!(matches!(guard.check(a), Err(WebhookRejection::RateLimited)));
        assert!(guard.check(b).is_ok());
    }

    #[test]
    fn test_rejection_status_codes() {
        assert_eq!(WebhookRejection::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(WebhookRejection::PayloadTooLarge(1).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(WebhookRejection::InvalidId("user").status(), StatusCode::BAD_REQUEST);
        assert_eq!(WebhookRejection::InvalidSecret.status(), StatusCode::UNAUTHORIZED);
    }
}
