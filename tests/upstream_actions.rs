use arrboard::config::{ApiServiceConfig, QbittorrentConfig};
use arrboard::db::library;
use arrboard::db::stats::{self, StatType};
use arrboard::metrics::{ResourceProbe, ResourceSample};
use arrboard::server::{self, API_KEY_HEADER};
use arrboard::sync::SyncStatus;
use arrboard::{AppState, Config, Db, ServiceKind};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const API_KEY: &str = "dashboard-key";
const HASH: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

struct IdleProbe;

impl ResourceProbe for IdleProbe {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample::default()
    }
}

#[derive(Debug, Clone)]
struct Call {
    method: String,
    path: String,
    query: String,
    body: Value,
}

/// Records every request and answers the handful of reads the services make.
#[derive(Clone, Default)]
struct Upstream {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Upstream {
    fn calls_to(&self, method: &str, path: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .cloned()
            .collect()
    }
}

async fn respond(State(upstream): State<Upstream>, request: Request) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let bytes = request.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    upstream.calls.lock().unwrap().push(Call {
        method: method.clone(),
        path: path.clone(),
        query,
        body,
    });

    let added = (Utc::now() - Duration::days(2)).to_rfc3339();
    match (method.as_str(), path.as_str()) {
        ("GET", "/radarr/api/v3/movie") => Json(json!([
            {"id": 1, "title": "Arrival", "year": 2016, "added": added, "hasFile": true, "monitored": true}
        ]))
        .into_response(),
        ("GET", "/radarr/api/v3/history") => Json(json!({
            "totalRecords": 1,
            "records": [{"movieId": 1, "downloadId": HASH, "date": added}]
        }))
        .into_response(),
        ("GET", "/radarr/api/v3/calendar") => Json(json!([])).into_response(),
        ("POST", "/qbit/api/v2/auth/login") => "Ok.".into_response(),
        ("GET", "/qbit/api/v2/torrents/info") => Json(json!([{
            "hash": HASH.to_ascii_lowercase(),
            "name": "Arrival.2016.1080p",
            "state": "uploading",
            "progress": 1.0,
            "ratio": 1.2,
            "size": 1073741824i64,
            "completion_on": 1_700_000_000i64
        }]))
        .into_response(),
        ("GET", "/prowlarr/api/v1/indexer") => {
            Json(json!([{"id": 3, "name": "Nyaa", "enable": true}])).into_response()
        }
        ("GET", "/prowlarr/api/v1/indexer/3") => Json(json!({
            "id": 3, "name": "Nyaa", "enable": true, "priority": 25, "fields": []
        }))
        .into_response(),
        ("GET", "/prowlarr/api/v1/search") => Json(json!([{
            "guid": "nyaa-1", "indexerId": 3, "title": "Dune.2021.2160p", "size": 42
        }]))
        .into_response(),
        _ => StatusCode::OK.into_response(),
    }
}

async fn start_upstream() -> (Upstream, String) {
    // Keep a system proxy from intercepting loopback calls.
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    std::env::set_var("no_proxy", "127.0.0.1,localhost");

    let upstream = Upstream::default();
    let app = Router::new().fallback(respond).with_state(upstream.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (upstream, base)
}

fn service(base: &str, prefix: &str) -> Option<ApiServiceConfig> {
    Some(ApiServiceConfig {
        url: format!("{}/{}", base, prefix),
        api_key: format!("{}-key", prefix),
        enabled: true,
    })
}

async fn app() -> (Router, AppState, Arc<Db>, Upstream) {
    let (upstream, base) = start_upstream().await;

    let mut config = Config::default();
    config.server.api_key = Some(API_KEY.to_string());
    config.services.radarr = service(&base, "radarr");
    config.services.sonarr = service(&base, "sonarr");
    config.services.jellyseerr = service(&base, "jellyseerr");
    config.services.prowlarr = service(&base, "prowlarr");
    config.services.qbittorrent = Some(QbittorrentConfig {
        url: format!("{}/qbit", base),
        username: "admin".into(),
        password: "secret".into(),
        enabled: true,
    });

    let db = Arc::new(Db::in_memory().await.unwrap());
    let state = AppState::build(db.clone(), Arc::new(config), Box::new(IdleProbe)).unwrap();
    (server::router(state.clone()), state, db, upstream)
}

fn api(method: Method, uri: &str, body: Option<Value>) -> axum::http::Request<Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(API_KEY_HEADER, API_KEY);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_request_approval_and_decline_reach_jellyseerr() {
    let (app, _, _, upstream) = app().await;

    let response = app
        .clone()
        .oneshot(api(Method::POST, "/api/requests/12/approve", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .oneshot(api(Method::POST, "/api/requests/13/decline", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(upstream.calls_to("POST", "/jellyseerr/api/v1/request/12/approve").len(), 1);
    assert_eq!(upstream.calls_to("POST", "/jellyseerr/api/v1/request/13/decline").len(), 1);
}

#[tokio::test]
async fn test_indexer_toggle_sends_full_document_back() {
    let (app, _, _, upstream) = app().await;

    let response = app
        .clone()
        .oneshot(api(Method::GET, "/api/indexers", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let indexers: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(indexers[0]["name"], "Nyaa");

    let response = app
        .oneshot(api(Method::PUT, "/api/indexers/3", Some(json!({"enabled": false}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let puts = upstream.calls_to("PUT", "/prowlarr/api/v1/indexer/3");
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].body["enable"], false);
    assert_eq!(puts[0].body["priority"], 25);
    assert_eq!(puts[0].body["fields"], json!([]));
}

#[tokio::test]
async fn test_indexer_search_and_grab() {
    let (app, _, _, upstream) = app().await;

    let response = app
        .clone()
        .oneshot(api(
            Method::POST,
            "/api/indexers/search",
            Some(json!({"query": "dune", "categories": [2000]})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let results: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(results[0]["guid"], "nyaa-1");

    let searches = upstream.calls_to("GET", "/prowlarr/api/v1/search");
    assert_eq!(searches.len(), 1);
    assert!(searches[0].query.contains("query=dune"));
    assert!(searches[0].query.contains("categories=2000"));

    let response = app
        .clone()
        .oneshot(api(
            Method::POST,
            "/api/indexers/grab",
            Some(json!({"guid": "nyaa-1", "indexer_id": 3})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let grabs = upstream.calls_to("POST", "/prowlarr/api/v1/search");
    assert_eq!(grabs.len(), 1);
    assert_eq!(grabs[0].body, json!({"guid": "nyaa-1", "indexerId": 3}));

    let response = app
        .oneshot(api(Method::POST, "/api/indexers/search", Some(json!({"query": "  "}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_movie_and_episode_commands() {
    let (app, _, _, upstream) = app().await;

    let response = app
        .clone()
        .oneshot(api(Method::POST, "/api/movies/search", Some(json!({"movie_ids": [1, 2]}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let commands = upstream.calls_to("POST", "/radarr/api/v3/command");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].body, json!({"name": "MoviesSearch", "movieIds": [1, 2]}));

    let response = app
        .clone()
        .oneshot(api(
            Method::POST,
            "/api/episodes/monitor",
            Some(json!({"episode_ids": [7], "monitored": false})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let monitors = upstream.calls_to("PUT", "/sonarr/api/v3/episode/monitor");
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0].body, json!({"episodeIds": [7], "monitored": false}));

    let response = app
        .clone()
        .oneshot(api(Method::POST, "/api/episodes/search", Some(json!({"episode_ids": [7, 8]}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let commands = upstream.calls_to("POST", "/sonarr/api/v3/command");
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].body, json!({"name": "EpisodeSearch", "episodeIds": [7, 8]}));

    let response = app
        .oneshot(api(Method::POST, "/api/episodes/search", Some(json!({"episode_ids": []}))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.calls_to("POST", "/sonarr/api/v3/command").len(), 1);
}

#[tokio::test]
async fn test_actions_on_unconfigured_services_are_not_found() {
    let mut config = Config::default();
    config.server.api_key = Some(API_KEY.to_string());
    let db = Arc::new(Db::in_memory().await.unwrap());
    let state = AppState::build(db, Arc::new(config), Box::new(IdleProbe)).unwrap();
    let app = server::router(state);

    for (method, uri, body) in [
        (Method::POST, "/api/requests/1/approve", None),
        (Method::GET, "/api/indexers", None),
        (Method::POST, "/api/movies/search", Some(json!({"movie_ids": [1]}))),
        (Method::POST, "/api/episodes/search", Some(json!({"episode_ids": [1]}))),
    ] {
        let response = app.clone().oneshot(api(method, uri, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn test_single_radarr_sync_enriches_torrents() {
    let (_, state, db, upstream) = app().await;

    let report = state.sync.run_service(ServiceKind::Radarr).await.unwrap();
    assert_eq!(report.status, SyncStatus::Success);

    let infos = upstream.calls_to("GET", "/qbit/api/v2/torrents/info");
    assert_eq!(infos.len(), 1);
    assert!(infos[0].query.contains(&HASH.to_ascii_lowercase()));

    let mut conn = db.acquire().await.unwrap();
    assert!(library::pending_enrichment_hashes(&mut conn)
        .await
        .unwrap()
        .is_empty());
    let monitored = stats::get(&mut conn, StatType::MonitoredItems)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitored.total, 1);
}
