use super::MediaType;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Title stored when the upstream entry arrived without its series attached.
pub const PLACEHOLDER_TITLE: &str = "Unknown";

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct CalendarEvent {
    pub id: i64,
    pub title: String,
    pub release_date: NaiveDate,
    pub media_type: MediaType,
    pub episode_label: Option<String>,
    pub event_type: String,
    pub image_url: Option<String>,
    pub source_service: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCalendarEvent {
    pub title: String,
    pub release_date: NaiveDate,
    pub media_type: MediaType,
    pub episode_label: Option<String>,
    pub event_type: String,
    pub image_url: Option<String>,
    pub source_service: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarMerge {
    Inserted,
    Patched,
    Unchanged,
}

async fn find_exact(
    conn: &mut SqliteConnection,
    event: &NewCalendarEvent,
    title: &str,
) -> Result<Option<CalendarEvent>> {
    let row = match event.media_type {
        MediaType::Movie => {
            sqlx::query_as::<_, CalendarEvent>(
                "SELECT * FROM calendar_events
                 WHERE title = ? AND release_date = ? AND media_type = 'movie'
                 ORDER BY id LIMIT 1",
            )
            .bind(title)
            .bind(event.release_date)
            .fetch_optional(&mut *conn)
            .await?
        }
        MediaType::Tv => {
            sqlx::query_as::<_, CalendarEvent>(
                "SELECT * FROM calendar_events
                 WHERE title = ? AND release_date = ? AND media_type = 'tv'
                   AND COALESCE(episode_label, '') = COALESCE(?, '')
                 ORDER BY id LIMIT 1",
            )
            .bind(title)
            .bind(event.release_date)
            .bind(&event.episode_label)
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    Ok(row)
}

/// Merge one upstream calendar entry.
///
/// Existing rows only have empty fields filled in. A TV row stored under the
/// placeholder title for the same date and episode is renamed rather than duplicated.
pub async fn merge_event(
    conn: &mut SqliteConnection,
    event: &NewCalendarEvent,
    now: DateTime<Utc>,
) -> Result<CalendarMerge> {
    let mut existing = find_exact(conn, event, &event.title).await?;
    let mut rename = false;

    if existing.is_none() && event.media_type == MediaType::Tv && event.title != PLACEHOLDER_TITLE {
        existing = find_exact(conn, event, PLACEHOLDER_TITLE).await?;
        rename = existing.is_some();
    }

    let Some(row) = existing else {
        sqlx::query(
            "INSERT INTO calendar_events
             (title, release_date, media_type, episode_label, event_type, image_url, source_service, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.title)
        .bind(event.release_date)
        .bind(event.media_type)
        .bind(&event.episode_label)
        .bind(&event.event_type)
        .bind(&event.image_url)
        .bind(&event.source_service)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        return Ok(CalendarMerge::Inserted);
    };

    let patch_image = row.image_url.as_deref().map(str::is_empty).unwrap_or(true)
        && event.image_url.as_deref().map(|u| !u.is_empty()).unwrap_or(false);

    if !rename && !patch_image {
        return Ok(CalendarMerge::Unchanged);
    }

    let title = if rename { &event.title } else { &row.title };
    let image_url = if patch_image {
        event.image_url.clone()
    } else {
        row.image_url.clone()
    };

    sqlx::query("UPDATE calendar_events SET title = ?, image_url = ?, updated_at = ? WHERE id = ?")
        .bind(title)
        .bind(image_url)
        .bind(now)
        .bind(row.id)
        .execute(&mut *conn)
        .await?;

    Ok(CalendarMerge::Patched)
}

/// Remove one source's events dated outside `from..=to`.
pub async fn delete_outside(
    conn: &mut SqliteConnection,
    source_service: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<u64> {
    let deleted = sqlx::query(
        "DELETE FROM calendar_events
         WHERE source_service = ? AND (release_date < ? OR release_date > ?)",
    )
    .bind(source_service)
    .bind(from)
    .bind(to)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(deleted)
}

pub async fn list_between(
    conn: &mut SqliteConnection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CalendarEvent>> {
    let rows = sqlx::query_as::<_, CalendarEvent>(
        "SELECT * FROM calendar_events
         WHERE release_date >= ? AND release_date <= ?
         ORDER BY release_date, title",
    )
    .bind(from)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
