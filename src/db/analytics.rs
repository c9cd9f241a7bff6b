use super::sessions::{DeviceType, PlaybackMediaType, PlaybackMethod, PlaybackSession};
use crate::error::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct DailyAnalytic {
    pub id: i64,
    pub date: NaiveDate,
    pub total_plays: i64,
    pub total_hours_watched: f64,
    pub movie_plays: i64,
    pub episode_plays: i64,
    pub other_plays: i64,
    pub direct_play_count: i64,
    pub direct_stream_count: i64,
    pub transcode_count: i64,
    pub unique_users: i64,
    pub unique_media: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct DeviceStatistic {
    pub id: i64,
    pub device_type: DeviceType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub session_count: i64,
    pub total_watched_seconds: i64,
    pub unique_users: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct MediaPlays {
    pub media_id: String,
    pub media_title: String,
    pub plays: i64,
    pub watched_seconds: i64,
}

pub(crate) fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn flag(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

/// Add a finalized session to its start date's totals, then recount that
/// day's distinct users and media from the session table.
pub async fn fold_session(
    conn: &mut SqliteConnection,
    session: &PlaybackSession,
    now: DateTime<Utc>,
) -> Result<NaiveDate> {
    let date = session.start_time.date_naive();
    let hours = session.watched_seconds as f64 / 3600.0;

    sqlx::query(
        "INSERT INTO daily_analytics
         (date, total_plays, total_hours_watched, movie_plays, episode_plays, other_plays,
          direct_play_count, direct_stream_count, transcode_count, updated_at)
         VALUES (?, 1, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(date) DO UPDATE SET
            total_plays = daily_analytics.total_plays + 1,
            total_hours_watched = daily_analytics.total_hours_watched + excluded.total_hours_watched,
            movie_plays = daily_analytics.movie_plays + excluded.movie_plays,
            episode_plays = daily_analytics.episode_plays + excluded.episode_plays,
            other_plays = daily_analytics.other_plays + excluded.other_plays,
            direct_play_count = daily_analytics.direct_play_count + excluded.direct_play_count,
            direct_stream_count = daily_analytics.direct_stream_count + excluded.direct_stream_count,
            transcode_count = daily_analytics.transcode_count + excluded.transcode_count,
            updated_at = excluded.updated_at",
    )
    .bind(date)
    .bind(hours)
    .bind(flag(session.media_type == PlaybackMediaType::Movie))
    .bind(flag(session.media_type == PlaybackMediaType::Episode))
    .bind(flag(session.media_type == PlaybackMediaType::Other))
    .bind(flag(session.playback_method == PlaybackMethod::DirectPlay))
    .bind(flag(session.playback_method == PlaybackMethod::DirectStream))
    .bind(flag(session.playback_method == PlaybackMethod::Transcode))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let from = day_start(date);
    let to = day_start(date + Days::new(1));
    sqlx::query(
        "UPDATE daily_analytics SET
            unique_users = (SELECT COUNT(DISTINCT user_id) FROM playback_sessions
                            WHERE start_time >= ? AND start_time < ?),
            unique_media = (SELECT COUNT(DISTINCT media_id) FROM playback_sessions
                            WHERE start_time >= ? AND start_time < ?)
         WHERE date = ?",
    )
    .bind(from)
    .bind(to)
    .bind(from)
    .bind(to)
    .bind(date)
    .execute(&mut *conn)
    .await?;

    Ok(date)
}

pub async fn daily(conn: &mut SqliteConnection, date: NaiveDate) -> Result<Option<DailyAnalytic>> {
    let row = sqlx::query_as::<_, DailyAnalytic>("SELECT * FROM daily_analytics WHERE date = ?")
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row)
}

pub async fn daily_since(conn: &mut SqliteConnection, from: NaiveDate) -> Result<Vec<DailyAnalytic>> {
    let rows = sqlx::query_as::<_, DailyAnalytic>(
        "SELECT * FROM daily_analytics WHERE date >= ? ORDER BY date",
    )
    .bind(from)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Recompute the device rows for `[period_start, period_end]`, replacing whatever
/// was stored for that window.
pub async fn rollup_devices(
    conn: &mut SqliteConnection,
    period_start: NaiveDate,
    period_end: NaiveDate,
    now: DateTime<Utc>,
) -> Result<u64> {
    sqlx::query("DELETE FROM device_statistics WHERE period_start = ? AND period_end = ?")
        .bind(period_start)
        .bind(period_end)
        .execute(&mut *conn)
        .await?;

    let inserted = sqlx::query(
        "INSERT INTO device_statistics
         (device_type, period_start, period_end, session_count, total_watched_seconds, unique_users, updated_at)
         SELECT device_type, ?, ?, COUNT(*), COALESCE(SUM(watched_seconds), 0), COUNT(DISTINCT user_id), ?
         FROM playback_sessions
         WHERE start_time >= ? AND start_time < ?
         GROUP BY device_type",
    )
    .bind(period_start)
    .bind(period_end)
    .bind(now)
    .bind(day_start(period_start))
    .bind(day_start(period_end + Days::new(1)))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(inserted)
}

pub async fn device_statistics(
    conn: &mut SqliteConnection,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> Result<Vec<DeviceStatistic>> {
    let rows = sqlx::query_as::<_, DeviceStatistic>(
        "SELECT * FROM device_statistics
         WHERE period_start = ? AND period_end = ?
         ORDER BY session_count DESC, device_type",
    )
    .bind(period_start)
    .bind(period_end)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Session count per device type for sessions started at or after `since`.
pub async fn device_counts(
    conn: &mut SqliteConnection,
    since: DateTime<Utc>,
) -> Result<Vec<(DeviceType, i64)>> {
    let rows: Vec<(DeviceType, i64)> = sqlx::query_as(
        "SELECT device_type, COUNT(*) FROM playback_sessions
         WHERE start_time >= ?
         GROUP BY device_type
         ORDER BY 2 DESC, 1",
    )
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

pub async fn top_media(
    conn: &mut SqliteConnection,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<MediaPlays>> {
    let rows = sqlx::query_as::<_, MediaPlays>(
        "SELECT media_id, MAX(media_title) AS media_title, COUNT(*) AS plays,
                COALESCE(SUM(watched_seconds), 0) AS watched_seconds
         FROM playback_sessions
         WHERE is_active = 0 AND start_time >= ?
         GROUP BY media_id
         ORDER BY plays DESC, watched_seconds DESC
         LIMIT ?",
    )
    .bind(since)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
