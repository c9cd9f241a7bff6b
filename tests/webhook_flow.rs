use arrboard::metrics::{ResourceProbe, ResourceSample};
use arrboard::server::{self, API_KEY_HEADER};
use arrboard::webhook::{self, SECRET_HEADER, SIGNATURE_HEADER};
use arrboard::{AppState, Config, Db};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const API_KEY: &str = "dashboard-key";
const SECRET: &str = "hook-secret";

struct IdleProbe;

impl ResourceProbe for IdleProbe {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample::default()
    }
}

async fn app() -> (Router, AppState) {
    let mut config = Config::default();
    config.server.api_key = Some(API_KEY.to_string());
    config.server.webhook_secret = Some(SECRET.to_string());
    config.server.max_webhook_body_bytes = 4096;

    let db = Arc::new(Db::in_memory().await.unwrap());
    let state = AppState::build(db, Arc::new(config), Box::new(IdleProbe)).unwrap();
    (server::router(state.clone()), state)
}

fn playback(event: &str, media_id: &str) -> Value {
    json!({
        "event": event,
        "media": {
            "id": media_id,
            "title": "Arrival",
            "type": "Movie",
            "runtime_ticks": 36_000_000_000i64
        },
        "user": { "id": "b".repeat(32), "name": "viewer" },
        "session": {
            "id": "session-1",
            "device_name": "Living Room",
            "client": "Jellyfin Android TV",
            "position_ticks": 27_000_000_000i64,
            "is_direct_play": true,
            "video": { "title": "1080p H264", "height": 1080 }
        }
    })
}

fn post_webhook(body: Vec<u8>, secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/jellyfin?api_key={}", API_KEY))
        .header("content-type", "application/json")
        .header(SECRET_HEADER, secret)
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_play_then_stop_records_watch_time() {
    let (app, state) = app().await;
    let media_id = "a".repeat(32);

    let body = serde_json::to_vec(&playback("PlaybackStart", &media_id)).unwrap();
    let response = app.clone().oneshot(post_webhook(body, SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["result"], "started");
    assert_eq!(state.reconciler.active_sessions().await.unwrap().len(), 1);

    let body = serde_json::to_vec(&playback("PlaybackStop", &media_id)).unwrap();
    let response = app.clone().oneshot(post_webhook(body, SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await;
    assert_eq!(outcome["result"], "stopped");
    assert_eq!(outcome["watched_seconds"], 2700);
    assert_eq!(outcome["is_watched"], true);

    assert!(state.reconciler.active_sessions().await.unwrap().is_empty());
    let daily = state.reconciler.daily_series(1).await.unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].total_plays, 1);
    assert_eq!(daily[0].movie_plays, 1);
    assert_eq!(daily[0].direct_play_count, 1);
}

#[tokio::test]
async fn test_signed_body_is_accepted() {
    let (app, _) = app().await;
    let body = serde_json::to_vec(&playback("play", &"c".repeat(32))).unwrap();
    let signature = webhook::sign(SECRET, &body).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/jellyfin?api_key={}", API_KEY))
        .header(SIGNATURE_HEADER, format!("sha256={}", signature))
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejections_leave_no_session() {
    let (app, state) = app().await;

    let body = serde_json::to_vec(&playback("play", &"a".repeat(32))).unwrap();
    let response = app.clone().oneshot(post_webhook(body, "wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = serde_json::to_vec(&playback("play", "../../etc/passwd")).unwrap();
    let response = app.clone().oneshot(post_webhook(body, SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let oversized = vec![b' '; 8192];
    let response = app.clone().oneshot(post_webhook(oversized, SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    assert!(state.reconciler.active_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_api_requires_key() {
    let (app, _) = app().await;

    let request = Request::builder()
        .uri("/api/analytics/sessions")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/analytics/sessions")
        .header(API_KEY_HEADER, API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!([]));

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unconfigured_service_sync_is_not_found() {
    let (app, _) = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/sync/radarr")
        .header(API_KEY_HEADER, API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
