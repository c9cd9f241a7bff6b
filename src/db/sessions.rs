use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Browser,
    Mobile,
    Streaming,
    SmartTv,
    Desktop,
    Console,
    Other,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Browser => "browser",
            DeviceType::Mobile => "mobile",
            DeviceType::Streaming => "streaming",
            DeviceType::SmartTv => "smart_tv",
            DeviceType::Desktop => "desktop",
            DeviceType::Console => "console",
            DeviceType::Other => "other",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
pub enum VideoQuality {
    #[sqlx(rename = "4k_hdr")]
    #[serde(rename = "4k_hdr")]
    Uhd4kHdr,
    #[sqlx(rename = "4k")]
    #[serde(rename = "4k")]
    Uhd4k,
    #[sqlx(rename = "1080p")]
    #[serde(rename = "1080p")]
    Hd1080,
    #[sqlx(rename = "720p")]
    #[serde(rename = "720p")]
    Hd720,
    #[sqlx(rename = "480p")]
    #[serde(rename = "480p")]
    Sd480,
    #[sqlx(rename = "360p")]
    #[serde(rename = "360p")]
    Sd360,
    #[sqlx(rename = "unknown")]
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMethod {
    DirectPlay,
    DirectStream,
    Transcode,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMediaType {
    Movie,
    Episode,
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct PlaybackSession {
    pub id: i64,
    pub session_key: Option<String>,
    pub media_id: String,
    pub media_title: String,
    pub media_type: PlaybackMediaType,
    pub user_id: String,
    pub user_name: Option<String>,
    pub device_name: Option<String>,
    pub client_name: Option<String>,
    pub device_type: DeviceType,
    pub video_quality: VideoQuality,
    pub playback_method: PlaybackMethod,
    pub is_transcoding: bool,
    pub status: SessionStatus,
    pub is_active: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_event_time: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub position_seconds: i64,
    pub watched_seconds: i64,
    pub is_watched: bool,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_key: Option<String>,
    pub media_id: String,
    pub media_title: String,
    pub media_type: PlaybackMediaType,
    pub user_id: String,
    pub user_name: Option<String>,
    pub device_name: Option<String>,
    pub client_name: Option<String>,
    pub device_type: DeviceType,
    pub video_quality: VideoQuality,
    pub playback_method: PlaybackMethod,
    pub duration_seconds: Option<i64>,
    pub position_seconds: i64,
}

/// The most recently started active row for a (media, user) slot.
pub async fn find_active(
    conn: &mut SqliteConnection,
    media_id: &str,
    user_id: &str,
) -> Result<Option<PlaybackSession>> {
    let row = sqlx::query_as::<_, PlaybackSession>(
        "SELECT * FROM playback_sessions
         WHERE media_id = ? AND user_id = ? AND is_active = 1
         ORDER BY start_time DESC, id DESC
         LIMIT 1",
    )
    .bind(media_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<PlaybackSession>> {
    let row = sqlx::query_as::<_, PlaybackSession>("SELECT * FROM playback_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    session: &NewSession,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO playback_sessions
         (session_key, media_id, media_title, media_type, user_id, user_name, device_name,
          client_name, device_type, video_quality, playback_method, is_transcoding, status,
          is_active, start_time, last_event_time, duration_seconds, position_seconds)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'playing', 1, ?, ?, ?, ?)",
    )
    .bind(&session.session_key)
    .bind(&session.media_id)
    .bind(&session.media_title)
    .bind(session.media_type)
    .bind(&session.user_id)
    .bind(&session.user_name)
    .bind(&session.device_name)
    .bind(&session.client_name)
    .bind(session.device_type)
    .bind(session.video_quality)
    .bind(session.playback_method)
    .bind(session.playback_method == PlaybackMethod::Transcode)
    .bind(now)
    .bind(now)
    .bind(session.duration_seconds)
    .bind(session.position_seconds)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Status change on a row that stays active (pause, resume, repeated play).
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: SessionStatus,
    position_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE playback_sessions SET
            status = ?,
            position_seconds = COALESCE(?, position_seconds),
            last_event_time = ?
         WHERE id = ? AND is_active = 1",
    )
    .bind(status)
    .bind(position_seconds)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record a progress report. The event time is refreshed even without a position.
pub async fn update_position(
    conn: &mut SqliteConnection,
    id: i64,
    position_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE playback_sessions SET
            position_seconds = COALESCE(?, position_seconds),
            last_event_time = ?
         WHERE id = ? AND is_active = 1",
    )
    .bind(position_seconds)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn finalize(
    conn: &mut SqliteConnection,
    id: i64,
    watched_seconds: i64,
    is_watched: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE playback_sessions SET
            status = 'stopped',
            is_active = 0,
            end_time = ?,
            last_event_time = ?,
            watched_seconds = ?,
            is_watched = ?
         WHERE id = ?",
    )
    .bind(now)
    .bind(now)
    .bind(watched_seconds)
    .bind(is_watched)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Force-stop every active row whose last event is older than `cutoff`.
/// `watched_seconds` is left as it is.
pub async fn stop_idle_since(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE playback_sessions SET
            status = 'stopped',
            is_active = 0,
            end_time = ?,
            last_event_time = ?
         WHERE is_active = 1 AND last_event_time < ?",
    )
    .bind(now)
    .bind(now)
    .bind(cutoff)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(affected)
}

pub async fn list_active(conn: &mut SqliteConnection) -> Result<Vec<PlaybackSession>> {
    let rows = sqlx::query_as::<_, PlaybackSession>(
        "SELECT * FROM playback_sessions WHERE is_active = 1 ORDER BY start_time DESC",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// (active, transcoding) counts over currently active rows.
pub async fn active_counts(conn: &mut SqliteConnection) -> Result<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(is_transcoding), 0)
         FROM playback_sessions WHERE is_active = 1",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(counts)
}

pub async fn count_active_for_slot(
    conn: &mut SqliteConnection,
    media_id: &str,
    user_id: &str,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM playback_sessions
         WHERE media_id = ? AND user_id = ? AND is_active = 1",
    )
    .bind(media_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}
