//! Playback session reconciliation.
//!
//! Webhook events drive a small state machine per (media, user) slot:
//! no session, then active (playing or paused), then stopped. Only one row per
//! slot is ever active. Finalized sessions are folded into `daily_analytics`.

pub mod policy;

pub use policy::{DefaultPlaybackPolicy, PlaybackPolicy, QualityHint};

use crate::config::AnalyticsConfig;
use crate::db::analytics::{self as analytics_db, DailyAnalytic, DeviceStatistic, MediaPlays};
use crate::db::sessions::{
    self, DeviceType, NewSession, PlaybackMediaType, PlaybackSession, SessionStatus,
};
use crate::db::Db;
use crate::error::{ArrboardError, Result};
use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Play,
    Stop,
    Pause,
    Resume,
    Progress,
    Other,
}

impl EventKind {
    /// Lenient: accepts "play", "PlaybackStart", "playback_stop", "unpause", ...
    /// Anything unrecognised is `Other`.
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.trim_start_matches("playback") {
            "play" | "start" | "started" => EventKind::Play,
            "stop" | "stopped" => EventKind::Stop,
            "pause" | "paused" => EventKind::Pause,
            "resume" | "resumed" | "unpause" => EventKind::Resume,
            "progress" => EventKind::Progress,
            _ => EventKind::Other,
        }
    }
}

/// A playback lifecycle event, already validated.
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub kind: EventKind,
    pub media_id: String,
    pub media_title: String,
    pub media_type: PlaybackMediaType,
    pub duration_seconds: Option<i64>,
    pub user_id: String,
    pub user_name: Option<String>,
    pub session_key: Option<String>,
    pub device_name: Option<String>,
    pub client_name: Option<String>,
    pub is_transcoding: bool,
    pub is_direct_play: bool,
    pub quality: QualityHint,
    pub position_seconds: Option<i64>,
    /// Explicit watched time reported with a stop.
    pub watched_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    Started { session_id: i64 },
    AlreadyActive { session_id: i64 },
    Stopped { session_id: i64, watched_seconds: i64, is_watched: bool, date: NaiveDate },
    Paused { session_id: i64 },
    Resumed { session_id: i64 },
    Progress { session_id: i64 },
    NoActiveSession,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceShare {
    pub device_type: DeviceType,
    pub sessions: i64,
    pub percentage: f64,
}

/// Split 100% over `counts` in tenths of a percent, handing leftover tenths to
/// the largest remainders so the result always sums to exactly 100.0.
pub fn largest_remainder_percentages(counts: &[i64]) -> Vec<f64> {
    let total: i64 = counts.iter().sum();
    if total <= 0 {
        return vec![0.0; counts.len()];
    }

    let mut tenths: Vec<i64> = Vec::with_capacity(counts.len());
    let mut remainders: Vec<(usize, i64)> = Vec::with_capacity(counts.len());
    for (i, count) in counts.iter().enumerate() {
        let scaled = count * 1000;
        tenths.push(scaled / total);
        remainders.push((i, scaled % total));
    }

    let leftover = 1000 - tenths.iter().sum::<i64>();
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in remainders.into_iter().take(leftover.max(0) as usize) {
        tenths[i] += 1;
    }

    tenths.into_iter().map(|t| t as f64 / 10.0).collect()
}

/// Watched time for a stop with no usable explicit value: wall-clock time since
/// the start, capped at the runtime when it is known.
fn elapsed_watched(session: &PlaybackSession, now: DateTime<Utc>) -> i64 {
    let elapsed = (now - session.start_time).num_seconds().max(0);
    match session.duration_seconds.filter(|d| *d > 0) {
        Some(duration) => elapsed.min(duration),
        None => elapsed,
    }
}

pub struct PlaybackReconciler {
    db: Arc<Db>,
    policy: Arc<dyn PlaybackPolicy>,
    orphan_timeout: ChronoDuration,
}

impl PlaybackReconciler {
    pub fn new(db: Arc<Db>, config: &AnalyticsConfig) -> Self {
        let policy = DefaultPlaybackPolicy {
            watched_threshold: config.watched_threshold,
        };
        Self::with_policy(db, Arc::new(policy), config)
    }

    pub fn with_policy(db: Arc<Db>, policy: Arc<dyn PlaybackPolicy>, config: &AnalyticsConfig) -> Self {
        Self {
            db,
            policy,
            orphan_timeout: ChronoDuration::hours(config.orphan_timeout_hours),
        }
    }

    pub async fn handle(&self, event: &PlaybackEvent) -> Result<EventOutcome> {
        self.handle_at(event, Utc::now()).await
    }

    pub async fn handle_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let outcome = match event.kind {
            EventKind::Play => self.start_at(event, now).await?,
            EventKind::Stop => self.stop_at(event, now).await?,
            EventKind::Pause => self.pause_at(event, now).await?,
            EventKind::Resume => self.resume_at(event, now).await?,
            EventKind::Progress => self.progress_at(event, now).await?,
            EventKind::Other => EventOutcome::Ignored,
        };
        debug!(media = %event.media_id, user = %event.user_id, ?outcome, "Playback event handled");
        Ok(outcome)
    }

    pub async fn start_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let mut tx = self.db.begin().await?;

        if let Some(active) = sessions::find_active(&mut tx, &event.media_id, &event.user_id).await? {
            sessions::set_status(&mut tx, active.id, SessionStatus::Playing, event.position_seconds, now)
                .await?;
            tx.commit().await?;
            return Ok(EventOutcome::AlreadyActive { session_id: active.id });
        }

        let new = NewSession {
            session_key: event.session_key.clone(),
            media_id: event.media_id.clone(),
            media_title: event.media_title.clone(),
            media_type: event.media_type,
            user_id: event.user_id.clone(),
            user_name: event.user_name.clone(),
            device_name: event.device_name.clone(),
            client_name: event.client_name.clone(),
            device_type: self
                .policy
                .device_type(event.client_name.as_deref(), event.device_name.as_deref()),
            video_quality: self.policy.video_quality(&event.quality),
            playback_method: self
                .policy
                .playback_method(event.is_transcoding, event.is_direct_play),
            duration_seconds: event.duration_seconds,
            position_seconds: event.position_seconds.unwrap_or(0),
        };

        let outcome = match sessions::insert(&mut tx, &new, now).await {
            Ok(session_id) => {
                info!(
                    session_id,
                    media = %event.media_title,
                    user = event.user_name.as_deref().unwrap_or(&event.user_id),
                    device = new.device_type.as_str(),
                    "Playback started"
                );
                EventOutcome::Started { session_id }
            }
            // Another delivery for the same slot won the race.
            Err(ArrboardError::Database(sqlx::Error::Database(e))) if e.is_unique_violation() => {
                let active = sessions::find_active(&mut tx, &event.media_id, &event.user_id)
                    .await?
                    .ok_or_else(|| ArrboardError::Unknown("active session vanished".to_string()))?;
                EventOutcome::AlreadyActive { session_id: active.id }
            }
            Err(e) => return Err(e),
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn stop_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let mut tx = self.db.begin().await?;

        let Some(active) = sessions::find_active(&mut tx, &event.media_id, &event.user_id).await? else {
            debug!(media = %event.media_id, user = %event.user_id, "Stop without active session");
            return Ok(EventOutcome::NoActiveSession);
        };

        let watched_seconds = match event.watched_seconds.filter(|w| *w > 0) {
            Some(explicit) => explicit,
            None => elapsed_watched(&active, now),
        };
        let duration = active.duration_seconds.or(event.duration_seconds);
        let is_watched = self.policy.is_watched(watched_seconds, duration);

        sessions::finalize(&mut tx, active.id, watched_seconds, is_watched, now).await?;
        let finished = sessions::get(&mut tx, active.id)
            .await?
            .ok_or_else(|| ArrboardError::Unknown(format!("session {} vanished", active.id)))?;
        let date = analytics_db::fold_session(&mut tx, &finished, now).await?;

        tx.commit().await?;

        info!(
            session_id = active.id,
            watched_seconds,
            is_watched,
            "Playback stopped"
        );
        Ok(EventOutcome::Stopped {
            session_id: active.id,
            watched_seconds,
            is_watched,
            date,
        })
    }

    pub async fn pause_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        self.transition(event, SessionStatus::Paused, now).await
    }

    pub async fn resume_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        self.transition(event, SessionStatus::Playing, now).await
    }

    async fn transition(
        &self,
        event: &PlaybackEvent,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome> {
        let mut conn = self.db.acquire().await?;
        let Some(active) = sessions::find_active(&mut conn, &event.media_id, &event.user_id).await? else {
            return Ok(EventOutcome::NoActiveSession);
        };

        sessions::set_status(&mut conn, active.id, status, event.position_seconds, now).await?;
        Ok(match status {
            SessionStatus::Paused => EventOutcome::Paused { session_id: active.id },
            _ => EventOutcome::Resumed { session_id: active.id },
        })
    }

    pub async fn progress_at(&self, event: &PlaybackEvent, now: DateTime<Utc>) -> Result<EventOutcome> {
        let mut conn = self.db.acquire().await?;
        let Some(active) = sessions::find_active(&mut conn, &event.media_id, &event.user_id).await? else {
            return Ok(EventOutcome::Ignored);
        };

        sessions::update_position(&mut conn, active.id, event.position_seconds, now).await?;
        Ok(EventOutcome::Progress { session_id: active.id })
    }

    /// Stop every session that has sent no event for the orphan timeout. Watched
    /// time is not estimated and the sessions are not counted in daily totals.
    pub async fn sweep_orphans_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        let reclaimed = sessions::stop_idle_since(&mut conn, now - self.orphan_timeout, now).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "Reclaimed orphaned playback sessions");
        }
        Ok(reclaimed)
    }

    pub async fn sweep_orphans(&self) -> Result<u64> {
        self.sweep_orphans_at(Utc::now()).await
    }

    /// Recompute the device rows for one day.
    pub async fn rollup_devices(&self, date: NaiveDate) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        let rows = analytics_db::rollup_devices(&mut conn, date, date, Utc::now()).await?;
        debug!(%date, rows, "Device statistics rolled up");
        Ok(rows)
    }

    pub async fn rollup_yesterday(&self, now: DateTime<Utc>) -> Result<u64> {
        let yesterday = now.date_naive() - Days::new(1);
        self.rollup_devices(yesterday).await
    }

    pub async fn device_statistics(&self, date: NaiveDate) -> Result<Vec<DeviceStatistic>> {
        let mut conn = self.db.acquire().await?;
        analytics_db::device_statistics(&mut conn, date, date).await
    }

    pub async fn device_breakdown(&self, days: i64) -> Result<Vec<DeviceShare>> {
        self.device_breakdown_at(days, Utc::now()).await
    }

    pub async fn device_breakdown_at(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<DeviceShare>> {
        let mut conn = self.db.acquire().await?;
        let counts = analytics_db::device_counts(&mut conn, now - ChronoDuration::days(days)).await?;

        let raw: Vec<i64> = counts.iter().map(|(_, c)| *c).collect();
        let percentages = largest_remainder_percentages(&raw);
        Ok(counts
            .into_iter()
            .zip(percentages)
            .map(|((device_type, sessions), percentage)| DeviceShare {
                device_type,
                sessions,
                percentage,
            })
            .collect())
    }

    /// Daily rows for the last `days` days, today included.
    pub async fn daily_series(&self, days: i64) -> Result<Vec<DailyAnalytic>> {
        let from = Utc::now().date_naive() - ChronoDuration::days(days.max(1) - 1);
        let mut conn = self.db.acquire().await?;
        analytics_db::daily_since(&mut conn, from).await
    }

    pub async fn top_media(&self, days: i64, limit: i64) -> Result<Vec<MediaPlays>> {
        let mut conn = self.db.acquire().await?;
        analytics_db::top_media(&mut conn, Utc::now() - ChronoDuration::days(days), limit).await
    }

    pub async fn active_sessions(&self) -> Result<Vec<PlaybackSession>> {
        let mut conn = self.db.acquire().await?;
        sessions::list_active(&mut conn).await
    }
}
