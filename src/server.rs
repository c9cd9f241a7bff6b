use crate::analytics::{DeviceShare, PlaybackReconciler};
use crate::config::Config;
use crate::connectors::prowlarr::{Indexer, SearchResult};
use crate::connectors::{ConnectionTest, Connectors, ServiceKind};
use crate::db::analytics::{DailyAnalytic, MediaPlays};
use crate::db::sessions::PlaybackSession;
use crate::db::sync_meta::SyncMetadata;
use crate::db::Db;
use crate::error::ArrboardError;
use crate::metrics::{MetricsService, MetricsView, ResourceProbe};
use crate::scheduler::{Intervals, Scheduler};
use crate::sync::{SyncService, SyncTarget};
use crate::webhook::{self, WebhookGuard};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connectors: Connectors,
    pub sync: Arc<SyncService>,
    pub reconciler: Arc<PlaybackReconciler>,
    pub metrics: Arc<MetricsService>,
    pub scheduler: Arc<Scheduler>,
    pub webhook_guard: Arc<WebhookGuard>,
}

impl AppState {
    /// Wire every service around one database. The scheduler is built but not started.
    pub fn build(
        db: Arc<Db>,
        config: Arc<Config>,
        probe: Box<dyn ResourceProbe>,
    ) -> crate::error::Result<Self> {
        let connectors = Connectors::from_config(&config.services)?;
        let sync = Arc::new(SyncService::new(db.clone(), connectors.clone(), config.clone()));
        let reconciler = Arc::new(PlaybackReconciler::new(db.clone(), &config.analytics));
        let metrics = Arc::new(MetricsService::new(db, probe, config.metrics.retention_days));
        let webhook_guard = Arc::new(WebhookGuard::new(config.server.webhook_rate_limit_per_minute));

        let intervals = Intervals {
            sync: Duration::from_secs(config.sync.interval_minutes.max(1) * 60),
            capture: Duration::from_secs(config.metrics.capture_interval_seconds.max(1)),
            cleanup: Duration::from_secs(config.metrics.cleanup_interval_minutes.max(1) * 60),
        };
        let scheduler = Arc::new(Scheduler::new(
            sync.clone(),
            reconciler.clone(),
            metrics.clone(),
            webhook_guard.clone(),
            intervals,
        ));

        Ok(Self {
            config,
            connectors,
            sync,
            reconciler,
            metrics,
            scheduler,
            webhook_guard,
        })
    }
}

/// Error body for the `/api` surface.
pub struct ApiError(ArrboardError);

impl From<ArrboardError> for ApiError {
    fn from(e: ArrboardError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArrboardError::NotConfigured(_) => StatusCode::NOT_FOUND,
            ArrboardError::Config(_) => StatusCode::BAD_REQUEST,
            ArrboardError::Upstream { .. } | ArrboardError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "API request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    let webhook_limit = state.config.server.webhook_body_limit();

    let api = Router::new()
        .route("/sync/all", post(trigger_all))
        .route("/sync/status", get(sync_status))
        .route("/sync/:service", post(trigger_service))
        .route("/services/:service/test", get(test_service))
        .route("/requests/:id/approve", post(approve_request))
        .route("/requests/:id/decline", post(decline_request))
        .route("/indexers", get(list_indexers))
        .route("/indexers/search", post(search_indexers))
        .route("/indexers/grab", post(grab_release))
        .route("/indexers/:id", put(toggle_indexer))
        .route("/movies/search", post(search_movies))
        .route("/episodes/monitor", post(monitor_episodes))
        .route("/episodes/search", post(search_episodes))
        .route("/analytics/devices", get(device_breakdown))
        .route("/analytics/daily", get(daily_series))
        .route("/analytics/top", get(top_media))
        .route("/analytics/sessions", get(active_sessions))
        .route("/metrics/latest", get(latest_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let webhooks = Router::new()
        .route("/webhook/jellyfin", post(webhook::receive))
        .layer(DefaultBodyLimit::max(webhook_limit));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .merge(webhooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("listening on http://{}", bind);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.config.server.api_key.as_deref() {
        let given = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        match given {
            Some(given) if constant_time_eq(given.as_bytes(), expected.as_bytes()) => {}
            _ => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "missing or invalid api key" })),
                )
                    .into_response()
            }
        }
    }
    next.run(request).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn parse_service(raw: &str) -> Result<ServiceKind, ApiError> {
    Ok(raw.parse::<ServiceKind>()?)
}

async fn trigger_all(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.trigger(SyncTarget::All)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": "all" }))))
}

async fn trigger_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_service(&service)?;
    if !kind.is_syncable() {
        return Err(ArrboardError::Config(format!("{} has no sync pass", kind)).into());
    }
    if state.connectors.get(kind).is_none() {
        return Err(ArrboardError::NotConfigured(kind).into());
    }

    state.scheduler.trigger(SyncTarget::Service(kind))?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": kind }))))
}

#[derive(Serialize)]
struct SyncStatusResponse {
    scheduler_running: bool,
    services: Vec<SyncMetadata>,
}

async fn sync_status(State(state): State<AppState>) -> ApiResult<SyncStatusResponse> {
    Ok(Json(SyncStatusResponse {
        scheduler_running: state.scheduler.is_running(),
        services: state.sync.status().await?,
    }))
}

async fn test_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> ApiResult<ConnectionTest> {
    let kind = parse_service(&service)?;
    Ok(Json(state.connectors.test(kind).await?))
}

fn configured<T>(client: Option<&T>, kind: ServiceKind) -> Result<&T, ApiError> {
    client.ok_or_else(|| ArrboardError::NotConfigured(kind).into())
}

fn non_empty(ids: &[i64], what: &str) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ArrboardError::Config(format!("{} must not be empty", what)).into());
    }
    Ok(())
}

async fn approve_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.jellyseerr.as_ref(), ServiceKind::Jellyseerr)?;
    client.approve_request(id).await?;
    info!(request = id, "Request approved");
    Ok(StatusCode::NO_CONTENT)
}

async fn decline_request(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.jellyseerr.as_ref(), ServiceKind::Jellyseerr)?;
    client.decline_request(id).await?;
    info!(request = id, "Request declined");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_indexers(State(state): State<AppState>) -> ApiResult<Vec<Indexer>> {
    let client = configured(state.connectors.prowlarr.as_ref(), ServiceKind::Prowlarr)?;
    Ok(Json(client.indexers().await?))
}

#[derive(Debug, Deserialize)]
struct IndexerToggle {
    enabled: bool,
}

async fn toggle_indexer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<IndexerToggle>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.prowlarr.as_ref(), ServiceKind::Prowlarr)?;
    client.set_indexer_enabled(id, body.enabled).await?;
    info!(indexer = id, enabled = body.enabled, "Indexer updated");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct IndexerSearch {
    query: String,
    #[serde(default)]
    categories: Vec<i64>,
}

async fn search_indexers(
    State(state): State<AppState>,
    Json(body): Json<IndexerSearch>,
) -> ApiResult<Vec<SearchResult>> {
    let client = configured(state.connectors.prowlarr.as_ref(), ServiceKind::Prowlarr)?;
    let query = body.query.trim();
    if query.is_empty() {
        return Err(ArrboardError::Config("query must not be empty".into()).into());
    }
    Ok(Json(client.search(query, &body.categories).await?))
}

#[derive(Debug, Deserialize)]
struct GrabRelease {
    guid: String,
    indexer_id: i64,
}

async fn grab_release(
    State(state): State<AppState>,
    Json(body): Json<GrabRelease>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.prowlarr.as_ref(), ServiceKind::Prowlarr)?;
    client.grab(&body.guid, body.indexer_id).await?;
    info!(indexer = body.indexer_id, guid = %body.guid, "Release sent to download client");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct MovieSearch {
    movie_ids: Vec<i64>,
}

async fn search_movies(
    State(state): State<AppState>,
    Json(body): Json<MovieSearch>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.radarr.as_ref(), ServiceKind::Radarr)?;
    non_empty(&body.movie_ids, "movie_ids")?;
    client.search_movies(&body.movie_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EpisodeMonitor {
    episode_ids: Vec<i64>,
    monitored: bool,
}

async fn monitor_episodes(
    State(state): State<AppState>,
    Json(body): Json<EpisodeMonitor>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.sonarr.as_ref(), ServiceKind::Sonarr)?;
    non_empty(&body.episode_ids, "episode_ids")?;
    client
        .monitor_episodes(&body.episode_ids, body.monitored)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct EpisodeSearch {
    episode_ids: Vec<i64>,
}

async fn search_episodes(
    State(state): State<AppState>,
    Json(body): Json<EpisodeSearch>,
) -> Result<StatusCode, ApiError> {
    let client = configured(state.connectors.sonarr.as_ref(), ServiceKind::Sonarr)?;
    non_empty(&body.episode_ids, "episode_ids")?;
    client.search_episodes(&body.episode_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    days: Option<i64>,
    limit: Option<i64>,
}

impl WindowQuery {
    fn days(&self) -> i64 {
        self.days.unwrap_or(7).clamp(1, 365)
    }

    fn limit(&self) -> i64 {
        self.limit.unwrap_or(10).clamp(1, 100)
    }
}

async fn device_breakdown(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<DeviceShare>> {
    Ok(Json(state.reconciler.device_breakdown(query.days()).await?))
}

async fn daily_series(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<DailyAnalytic>> {
    Ok(Json(state.reconciler.daily_series(query.days()).await?))
}

async fn top_media(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<MediaPlays>> {
    Ok(Json(
        state
            .reconciler
            .top_media(query.days(), query.limit())
            .await?,
    ))
}

async fn active_sessions(State(state): State<AppState>) -> ApiResult<Vec<PlaybackSession>> {
    Ok(Json(state.reconciler.active_sessions().await?))
}

async fn latest_metrics(State(state): State<AppState>) -> ApiResult<Option<MetricsView>> {
    Ok(Json(state.metrics.latest().await?))
}
