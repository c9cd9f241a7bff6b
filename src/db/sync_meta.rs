use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct SyncMetadata {
    pub id: i64,
    pub service_name: String,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub next_sync_time: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub records_synced: i64,
    pub duration_ms: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one finished pass.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub records_synced: i64,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub next_sync_time: DateTime<Utc>,
}

pub async fn mark_in_progress(
    conn: &mut SqliteConnection,
    service_name: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_metadata (service_name, status, updated_at)
         VALUES (?, 'in_progress', ?)
         ON CONFLICT(service_name) DO UPDATE SET
            status = 'in_progress',
            updated_at = excluded.updated_at",
    )
    .bind(service_name)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record the result of a pass. A failed pass keeps its previous record count.
pub async fn finalize(
    conn: &mut SqliteConnection,
    service_name: &str,
    outcome: &SyncOutcome,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_metadata
         (service_name, last_sync_time, next_sync_time, status, records_synced, duration_ms, last_error, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(service_name) DO UPDATE SET
            last_sync_time = excluded.last_sync_time,
            next_sync_time = excluded.next_sync_time,
            status = excluded.status,
            records_synced = CASE WHEN excluded.status = 'failed'
                THEN sync_metadata.records_synced ELSE excluded.records_synced END,
            duration_ms = excluded.duration_ms,
            last_error = excluded.last_error,
            updated_at = excluded.updated_at",
    )
    .bind(service_name)
    .bind(outcome.finished_at)
    .bind(outcome.next_sync_time)
    .bind(outcome.status)
    .bind(outcome.records_synced)
    .bind(outcome.duration_ms)
    .bind(&outcome.error)
    .bind(outcome.finished_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, service_name: &str) -> Result<Option<SyncMetadata>> {
    let row = sqlx::query_as::<_, SyncMetadata>(
        "SELECT * FROM sync_metadata WHERE service_name = ?",
    )
    .bind(service_name)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<SyncMetadata>> {
    let rows = sqlx::query_as::<_, SyncMetadata>("SELECT * FROM sync_metadata ORDER BY service_name")
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows)
}
