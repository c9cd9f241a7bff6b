//! Per-service sync passes.
//!
//! Each pass fetches everything it needs from upstream first, then applies it
//! inside one transaction. A pass that fails leaves no partial writes and is
//! recorded as failed in `sync_metadata`; other services still run.

pub mod calendar;
pub mod library;
pub mod requests;
pub mod stats;

use crate::config::{Config, SyncConfig};
use crate::connectors::jellyfin::{ItemCounts, JellyfinUser};
use crate::connectors::radarr::{RadarrCalendarEntry, RadarrMovie};
use crate::connectors::sonarr::{SonarrCalendarEntry, SonarrSeries};
use crate::connectors::{Connectors, RadarrClient, ServiceKind, SonarrClient};
use crate::db::requests::RequestUpsert;
use crate::db::sync_meta::{self, SyncOutcome};
pub use crate::db::sync_meta::SyncStatus;
use crate::db::Db;
use crate::error::{ArrboardError, Result};
use crate::notifications::NotificationService;
use crate::torrents::{enrich_pending, EnrichmentReport, HistoryIndex, HistoryRecord};
use calendar::CalendarWindow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use library::UpstreamEntity;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "target", content = "service")]
pub enum SyncTarget {
    All,
    Service(ServiceKind),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub service: ServiceKind,
    pub status: SyncStatus,
    pub records: usize,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Time bounds a pass works within, derived from `[sync]` and the current time.
#[derive(Debug, Clone, Copy)]
pub struct PassWindow {
    pub now: DateTime<Utc>,
    pub recent_cutoff: DateTime<Utc>,
    pub calendar: CalendarWindow,
}

impl PassWindow {
    pub fn new(config: &SyncConfig, now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            now,
            recent_cutoff: now - ChronoDuration::days(config.recent_days),
            calendar: CalendarWindow {
                start: today - ChronoDuration::days(config.calendar_days_behind),
                end: today + ChronoDuration::days(config.calendar_days_ahead),
            },
        }
    }
}

/// Everything one Radarr pass needs, fetched up front.
#[derive(Debug, Clone, Default)]
pub struct RadarrSnapshot {
    pub movies: Vec<RadarrMovie>,
    pub history: Vec<HistoryRecord>,
    pub calendar: Vec<RadarrCalendarEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SonarrSnapshot {
    pub series: Vec<SonarrSeries>,
    pub history: Vec<HistoryRecord>,
    pub calendar: Vec<SonarrCalendarEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct JellyfinSnapshot {
    pub users: Vec<JellyfinUser>,
    pub counts: ItemCounts,
}

pub async fn apply_radarr(
    conn: &mut SqliteConnection,
    snapshot: &RadarrSnapshot,
    window: &PassWindow,
) -> Result<usize> {
    let index = HistoryIndex::build(&snapshot.history);
    let entities: Vec<UpstreamEntity> = snapshot.movies.iter().map(UpstreamEntity::from).collect();
    let report = library::reconcile_library(
        conn,
        ServiceKind::Radarr,
        &entities,
        &index,
        window.recent_cutoff,
        window.now,
    )
    .await?;

    let events = calendar::movie_events(&snapshot.calendar, window.calendar);
    let changed = calendar::merge_events(conn, &events, window.now).await?;
    let pruned = calendar::prune_outside(conn, ServiceKind::Radarr, window.calendar).await?;

    info!(
        service = "radarr",
        inserted = report.inserted,
        updated = report.updated,
        links = report.links_added,
        skipped = report.skipped,
        calendar = changed,
        pruned,
        "Library pass applied"
    );
    Ok(report.records() + changed)
}

pub async fn apply_sonarr(
    conn: &mut SqliteConnection,
    snapshot: &SonarrSnapshot,
    window: &PassWindow,
) -> Result<usize> {
    let index = HistoryIndex::build(&snapshot.history);
    let entities: Vec<UpstreamEntity> = snapshot.series.iter().map(UpstreamEntity::from).collect();
    let report = library::reconcile_library(
        conn,
        ServiceKind::Sonarr,
        &entities,
        &index,
        window.recent_cutoff,
        window.now,
    )
    .await?;

    let events = calendar::episode_events(&snapshot.calendar, window.calendar);
    let changed = calendar::merge_events(conn, &events, window.now).await?;
    let pruned = calendar::prune_outside(conn, ServiceKind::Sonarr, window.calendar).await?;

    info!(
        service = "sonarr",
        inserted = report.inserted,
        updated = report.updated,
        links = report.links_added,
        skipped = report.skipped,
        calendar = changed,
        pruned,
        "Library pass applied"
    );
    Ok(report.records() + changed)
}

pub async fn apply_jellyfin(
    conn: &mut SqliteConnection,
    snapshot: &JellyfinSnapshot,
    window: &PassWindow,
) -> Result<usize> {
    stats::store_media_server_stats(conn, &snapshot.users, &snapshot.counts, window.now).await
}

pub async fn apply_jellyseerr(
    conn: &mut SqliteConnection,
    upstream: &[RequestUpsert],
    window: &PassWindow,
) -> Result<usize> {
    let report = requests::mirror_requests(conn, upstream, window.now).await?;
    Ok(report.upserted)
}

/// Run `pass` under sync-metadata bookkeeping: `in_progress` first, then
/// `success` or `failed` with duration, count and error. The next run is always
/// scheduled one interval after this one finished.
pub async fn record_run<F, Fut>(
    db: &Db,
    service: ServiceKind,
    interval: ChronoDuration,
    pass: F,
) -> SyncReport
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<usize>>,
{
    let name = service.as_str();
    if let Err(e) = mark_in_progress(db, name).await {
        warn!(service = name, error = %e, "Could not mark sync in progress");
    }

    let started = Instant::now();
    let result = pass().await;
    let duration_ms = started.elapsed().as_millis() as i64;
    let finished_at = Utc::now();

    let (status, records, error) = match result {
        Ok(records) => (SyncStatus::Success, records, None),
        Err(e) => (SyncStatus::Failed, 0, Some(e.to_string())),
    };

    let outcome = SyncOutcome {
        status,
        records_synced: records as i64,
        duration_ms,
        error: error.clone(),
        finished_at,
        next_sync_time: finished_at + interval,
    };
    if let Err(e) = finalize(db, name, &outcome).await {
        error!(service = name, error = %e, "Could not record sync outcome");
    }

    match &error {
        Some(message) => error!(service = name, duration_ms, error = %message, "Sync failed"),
        None => info!(service = name, records, duration_ms, "Sync finished"),
    }

    SyncReport {
        service,
        status,
        records,
        duration_ms,
        error,
    }
}

async fn mark_in_progress(db: &Db, name: &str) -> Result<()> {
    let mut conn = db.acquire().await?;
    sync_meta::mark_in_progress(&mut conn, name, Utc::now()).await
}

async fn finalize(db: &Db, name: &str, outcome: &SyncOutcome) -> Result<()> {
    let mut conn = db.acquire().await?;
    sync_meta::finalize(&mut conn, name, outcome).await
}

fn require<T>(client: Option<&T>, kind: ServiceKind) -> Result<&T> {
    client.ok_or(ArrboardError::NotConfigured(kind))
}

pub struct SyncService {
    db: Arc<Db>,
    connectors: Connectors,
    config: Arc<Config>,
    notifier: NotificationService,
}

impl SyncService {
    pub fn new(db: Arc<Db>, connectors: Connectors, config: Arc<Config>) -> Self {
        let notifier = NotificationService::new(config.notifications.clone());
        Self {
            db,
            connectors,
            config,
            notifier,
        }
    }

    pub fn connectors(&self) -> &Connectors {
        &self.connectors
    }

    fn interval(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.config.sync.interval_minutes as i64)
    }

    pub async fn run(&self, target: SyncTarget) -> Result<Vec<SyncReport>> {
        match target {
            SyncTarget::All => Ok(self.run_all().await),
            SyncTarget::Service(kind) => Ok(vec![self.run_service(kind).await?]),
        }
    }

    /// Every configured syncable service in turn, then torrent enrichment and
    /// the monitored-items statistic.
    pub async fn run_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::new();
        for kind in self.connectors.configured() {
            if !kind.is_syncable() {
                continue;
            }
            match self.run_pass(kind).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(service = %kind, error = %e, "Sync skipped"),
            }
        }

        self.follow_up().await;
        reports
    }

    /// One service's pass. A successful Radarr or Sonarr pass is followed by
    /// enrichment and the monitored-items statistic, as in a full sync.
    pub async fn run_service(&self, kind: ServiceKind) -> Result<SyncReport> {
        let report = self.run_pass(kind).await?;
        if report.status == SyncStatus::Success
            && matches!(kind, ServiceKind::Radarr | ServiceKind::Sonarr)
        {
            self.follow_up().await;
        }
        Ok(report)
    }

    async fn run_pass(&self, kind: ServiceKind) -> Result<SyncReport> {
        if !kind.is_syncable() {
            return Err(ArrboardError::Config(format!("{} has no sync pass", kind)));
        }
        if self.connectors.get(kind).is_none() {
            return Err(ArrboardError::NotConfigured(kind));
        }

        let report = record_run(&self.db, kind, self.interval(), move || self.pass(kind)).await;

        if let Some(message) = &report.error {
            if let Err(e) = self.notifier.notify_sync_failed(kind, message).await {
                warn!(service = %kind, error = %e, "Failure notification not delivered");
            }
        }
        Ok(report)
    }

    async fn follow_up(&self) {
        if let Err(e) = self.enrich_torrents().await {
            warn!(error = %e, "Torrent enrichment failed");
        }
        if let Err(e) = self.update_monitored().await {
            warn!(error = %e, "Monitored items update failed");
        }
    }

    async fn pass(&self, kind: ServiceKind) -> Result<usize> {
        let window = PassWindow::new(&self.config.sync, Utc::now());

        match kind {
            ServiceKind::Radarr => {
                let client = require(self.connectors.radarr.as_ref(), kind)?;
                let snapshot = self.fetch_radarr(client, &window).await?;
                let mut tx = self.db.begin().await?;
                let records = apply_radarr(&mut tx, &snapshot, &window).await?;
                tx.commit().await?;
                Ok(records)
            }
            ServiceKind::Sonarr => {
                let client = require(self.connectors.sonarr.as_ref(), kind)?;
                let snapshot = self.fetch_sonarr(client, &window).await?;
                let mut tx = self.db.begin().await?;
                let records = apply_sonarr(&mut tx, &snapshot, &window).await?;
                tx.commit().await?;
                Ok(records)
            }
            ServiceKind::Jellyfin => {
                let client = require(self.connectors.jellyfin.as_ref(), kind)?;
                let snapshot = JellyfinSnapshot {
                    users: client.users().await?,
                    counts: client.item_counts().await?,
                };
                let mut tx = self.db.begin().await?;
                let records = apply_jellyfin(&mut tx, &snapshot, &window).await?;
                tx.commit().await?;
                Ok(records)
            }
            ServiceKind::Jellyseerr => {
                let client = require(self.connectors.jellyseerr.as_ref(), kind)?;
                let upstream: Vec<RequestUpsert> = client
                    .all_requests(self.config.sync.request_page_size)
                    .await?
                    .into_iter()
                    .map(|r| r.into_upsert())
                    .collect();
                let mut tx = self.db.begin().await?;
                let records = apply_jellyseerr(&mut tx, &upstream, &window).await?;
                tx.commit().await?;
                Ok(records)
            }
            ServiceKind::Qbittorrent | ServiceKind::Prowlarr => Err(ArrboardError::Config(
                format!("{} has no sync pass", kind),
            )),
        }
    }

    async fn fetch_radarr(&self, client: &RadarrClient, window: &PassWindow) -> Result<RadarrSnapshot> {
        Ok(RadarrSnapshot {
            movies: client.movies().await?,
            history: client.recent_history(self.config.sync.history_page_size).await?,
            calendar: client
                .calendar(window.calendar.start, window.calendar.end)
                .await?,
        })
    }

    async fn fetch_sonarr(&self, client: &SonarrClient, window: &PassWindow) -> Result<SonarrSnapshot> {
        Ok(SonarrSnapshot {
            series: client.series().await?,
            history: client.recent_history(self.config.sync.history_page_size).await?,
            calendar: client
                .calendar(window.calendar.start, window.calendar.end)
                .await?,
        })
    }

    pub async fn enrich_torrents(&self) -> Result<EnrichmentReport> {
        match &self.connectors.qbittorrent {
            Some(client) => enrich_pending(&self.db, client, Utc::now()).await,
            None => Ok(EnrichmentReport::default()),
        }
    }

    /// Monitored totals across Radarr and Sonarr. An unconfigured or unreachable
    /// service counts as zero.
    pub async fn update_monitored(&self) -> Result<i64> {
        let movies = match &self.connectors.radarr {
            Some(client) => match client.movies().await {
                Ok(movies) => Some(RadarrClient::monitored_counts(&movies)),
                Err(e) => {
                    warn!(error = %e, "Radarr unavailable for monitored counts");
                    None
                }
            },
            None => None,
        };
        let series = match &self.connectors.sonarr {
            Some(client) => match client.series().await {
                Ok(series) => Some(SonarrClient::monitored_counts(&series)),
                Err(e) => {
                    warn!(error = %e, "Sonarr unavailable for monitored counts");
                    None
                }
            },
            None => None,
        };

        let mut conn = self.db.acquire().await?;
        stats::store_monitored(&mut conn, movies, series, Utc::now()).await
    }

    pub async fn status(&self) -> Result<Vec<sync_meta::SyncMetadata>> {
        let mut conn = self.db.acquire().await?;
        sync_meta::list(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::library::{self as library_db, NewLibraryItem};
    use crate::db::{calendar as calendar_db, MediaType};

    const MOVIES: &str = r#"[
        {"id": 1, "title": "Arrival", "year": 2016, "added": "ADDED", "hasFile": true, "monitored": true,
         "movieFile": {"size": 1073741824, "quality": {"quality": {"name": "Bluray-1080p"}}}},
        {"id": 2, "title": "Heat", "year": 1995, "added": "ADDED", "monitored": true}
    ]"#;

    fn snapshot(now: DateTime<Utc>) -> RadarrSnapshot {
        let added = (now - ChronoDuration::days(2)).to_rfc3339();
        let movies: Vec<RadarrMovie> =
            serde_json::from_str(&MOVIES.replace("ADDED", &added)).unwrap();
        let release = (now + ChronoDuration::days(3)).to_rfc3339();
        let calendar: Vec<RadarrCalendarEntry> = serde_json::from_str(&format!(
            r#"[{{"title": "Arrival", "digitalRelease": "{}"}}]"#,
            release
        ))
        .unwrap();
        RadarrSnapshot {
            movies,
            history: vec![HistoryRecord {
                entity_id: 1,
                episode_id: None,
                season_number: None,
                download_id: Some("qBittorrent-0123456789abcdef0123456789abcdef01234567".into()),
                date: None,
            }],
            calendar,
        }
    }

    #[tokio::test]
    async fn test_pass_is_idempotent() {
        let db = Db::in_memory().await.unwrap();
        let now = Utc::now();
        let window = PassWindow::new(&SyncConfig::default(), now);
        let snapshot = snapshot(now);

        for _ in 0..2 {
            let mut tx = db.begin().await.unwrap();
            apply_radarr(&mut tx, &snapshot, &window).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut conn = db.acquire().await.unwrap();
        assert_eq!(library_db::count(&mut conn).await.unwrap(), 2);
        let arrival = library_db::find_by_natural_key(&mut conn, "Arrival", 2016, MediaType::Movie)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            arrival.torrent_hash.as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEF01234567")
        );
        assert_eq!(arrival.size, "1.0 GB");
        assert_eq!(arrival.added_ago.as_deref(), Some("2 days ago"));
        assert_eq!(
            library_db::torrent_links(&mut conn, arrival.id).await.unwrap().len(),
            1
        );

        let events = calendar_db::list_between(&mut conn, window.calendar.start, window.calendar.end)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_pass_prunes_only_its_own_stale_events() {
        let db = Db::in_memory().await.unwrap();
        let now = Utc::now();
        let window = PassWindow::new(&SyncConfig::default(), now);
        let stale = window.calendar.start - ChronoDuration::days(3);

        let mut conn = db.acquire().await.unwrap();
        for (title, media_type, source) in [
            ("Old Movie", MediaType::Movie, ServiceKind::Radarr),
            ("Old Show", MediaType::Tv, ServiceKind::Sonarr),
        ] {
            let event = calendar_db::NewCalendarEvent {
                title: title.into(),
                release_date: stale,
                media_type,
                episode_label: None,
                event_type: "digital".into(),
                image_url: None,
                source_service: source.to_string(),
            };
            calendar_db::merge_event(&mut conn, &event, now).await.unwrap();
        }
        drop(conn);

        let mut tx = db.begin().await.unwrap();
        apply_radarr(&mut tx, &snapshot(now), &window).await.unwrap();
        tx.commit().await.unwrap();

        let mut conn = db.acquire().await.unwrap();
        let before = calendar_db::list_between(&mut conn, stale, stale).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].title, "Old Show");
        let inside = calendar_db::list_between(&mut conn, window.calendar.start, window.calendar.end)
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].title, "Arrival");
    }

    #[tokio::test]
    async fn test_failed_pass_rolls_back_and_is_recorded() {
        let db = Db::in_memory().await.unwrap();
        let now = Utc::now();

        let pool = &db;
        let report = record_run(&db, ServiceKind::Radarr, ChronoDuration::minutes(15), move || async move {
            let mut tx = pool.begin().await?;
            let item = NewLibraryItem {
                title: "Partial".into(),
                year: 2020,
                media_type: MediaType::Movie,
                source_service: "radarr".into(),
                external_id: 5,
                size_bytes: 0,
                size: "0 B".into(),
                quality: None,
                added_at: Some(now),
                added_ago: None,
                poster_url: None,
                file_count: 0,
                episode_count: 0,
                monitored: false,
                torrent_hash: None,
            };
            library_db::insert(&mut tx, &item, now).await?;
            Err::<usize, _>(ArrboardError::upstream(ServiceKind::Radarr, "connection reset"))
        })
        .await;

        assert_eq!(report.status, SyncStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("connection reset"));

        let mut conn = db.acquire().await.unwrap();
        assert_eq!(library_db::count(&mut conn).await.unwrap(), 0);
        let meta = sync_meta::get(&mut conn, "radarr").await.unwrap().unwrap();
        assert_eq!(meta.status, SyncStatus::Failed);
        assert!(meta.last_error.unwrap().contains("connection reset"));
        assert!(meta.next_sync_time.unwrap() > meta.last_sync_time.unwrap());
    }

    #[tokio::test]
    async fn test_successful_run_records_count() {
        let db = Db::in_memory().await.unwrap();
        let report = record_run(&db, ServiceKind::Jellyseerr, ChronoDuration::minutes(5), || async {
            Ok(4)
        })
        .await;
        assert_eq!(report.status, SyncStatus::Success);

        let mut conn = db.acquire().await.unwrap();
        let meta = sync_meta::get(&mut conn, "jellyseerr").await.unwrap().unwrap();
        assert_eq!(meta.records_synced, 4);
        assert_eq!(meta.last_error, None);
    }

    #[tokio::test]
    async fn test_unconfigured_service_is_rejected() {
        let db = Arc::new(Db::in_memory().await.unwrap());
        let service = SyncService::new(db, Connectors::default(), Arc::new(Config::default()));
        assert!(matches!(
            service.run_service(ServiceKind::Radarr).await,
            Err(ArrboardError::NotConfigured(ServiceKind::Radarr))
        ));
        assert!(service.run_all().await.is_empty());
    }
}
