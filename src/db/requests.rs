use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::HashSet;

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct JellyseerrRequest {
    pub id: i64,
    pub jellyseerr_id: i64,
    pub media_type: String,
    pub tmdb_id: Option<i64>,
    pub title: Option<String>,
    pub status: String,
    pub media_status: Option<String>,
    pub requested_by: Option<String>,
    pub is_4k: bool,
    pub season_count: i64,
    pub requested_at: Option<DateTime<Utc>>,
    pub upstream_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestUpsert {
    pub jellyseerr_id: i64,
    pub media_type: String,
    pub tmdb_id: Option<i64>,
    pub title: Option<String>,
    pub status: String,
    pub media_status: Option<String>,
    pub requested_by: Option<String>,
    pub is_4k: bool,
    pub season_count: i64,
    pub requested_at: Option<DateTime<Utc>>,
    pub upstream_updated_at: Option<DateTime<Utc>>,
}

pub async fn upsert(
    conn: &mut SqliteConnection,
    request: &RequestUpsert,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO jellyseerr_requests
         (jellyseerr_id, media_type, tmdb_id, title, status, media_status, requested_by,
          is_4k, season_count, requested_at, upstream_updated_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(jellyseerr_id) DO UPDATE SET
            media_type = excluded.media_type,
            tmdb_id = excluded.tmdb_id,
            title = COALESCE(excluded.title, jellyseerr_requests.title),
            status = excluded.status,
            media_status = excluded.media_status,
            requested_by = excluded.requested_by,
            is_4k = excluded.is_4k,
            season_count = excluded.season_count,
            requested_at = excluded.requested_at,
            upstream_updated_at = excluded.upstream_updated_at,
            updated_at = excluded.updated_at",
    )
    .bind(request.jellyseerr_id)
    .bind(&request.media_type)
    .bind(request.tmdb_id)
    .bind(&request.title)
    .bind(&request.status)
    .bind(&request.media_status)
    .bind(&request.requested_by)
    .bind(request.is_4k)
    .bind(request.season_count)
    .bind(request.requested_at)
    .bind(request.upstream_updated_at)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Delete every local request whose upstream id is not in `keep`. An empty
/// `keep` clears the table. Returns the number of deleted rows.
pub async fn delete_missing(conn: &mut SqliteConnection, keep: &[i64]) -> Result<u64> {
    let local: Vec<(i64,)> = sqlx::query_as("SELECT jellyseerr_id FROM jellyseerr_requests")
        .fetch_all(&mut *conn)
        .await?;

    let keep: HashSet<i64> = keep.iter().copied().collect();
    let mut deleted = 0;
    for (jellyseerr_id,) in local {
        if keep.contains(&jellyseerr_id) {
            continue;
        }
        deleted += sqlx::query("DELETE FROM jellyseerr_requests WHERE jellyseerr_id = ?")
            .bind(jellyseerr_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }

    Ok(deleted)
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<JellyseerrRequest>> {
    let rows = sqlx::query_as::<_, JellyseerrRequest>(
        "SELECT * FROM jellyseerr_requests ORDER BY requested_at DESC, jellyseerr_id DESC",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
