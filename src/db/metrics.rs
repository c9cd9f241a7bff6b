use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, sqlx::FromRow)]
pub struct ServerMetric {
    pub id: i64,
    pub captured_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: i64,
    pub memory_total_bytes: i64,
    pub disk_percent: f64,
    pub disk_used_bytes: i64,
    pub disk_total_bytes: i64,
    pub network_rx_bps: f64,
    pub network_tx_bps: f64,
    pub active_sessions: i64,
    pub transcoding_sessions: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewServerMetric {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: i64,
    pub memory_total_bytes: i64,
    pub disk_percent: f64,
    pub disk_used_bytes: i64,
    pub disk_total_bytes: i64,
    pub network_rx_bps: f64,
    pub network_tx_bps: f64,
    pub active_sessions: i64,
    pub transcoding_sessions: i64,
}

pub async fn insert(
    conn: &mut SqliteConnection,
    metric: &NewServerMetric,
    captured_at: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO server_metrics
         (captured_at, cpu_percent, memory_percent, memory_used_bytes, memory_total_bytes,
          disk_percent, disk_used_bytes, disk_total_bytes, network_rx_bps, network_tx_bps,
          active_sessions, transcoding_sessions)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(captured_at)
    .bind(metric.cpu_percent)
    .bind(metric.memory_percent)
    .bind(metric.memory_used_bytes)
    .bind(metric.memory_total_bytes)
    .bind(metric.disk_percent)
    .bind(metric.disk_used_bytes)
    .bind(metric.disk_total_bytes)
    .bind(metric.network_rx_bps)
    .bind(metric.network_tx_bps)
    .bind(metric.active_sessions)
    .bind(metric.transcoding_sessions)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn latest(conn: &mut SqliteConnection) -> Result<Option<ServerMetric>> {
    let row = sqlx::query_as::<_, ServerMetric>(
        "SELECT * FROM server_metrics ORDER BY captured_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub async fn delete_before(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM server_metrics WHERE captured_at < ?")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(deleted)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM server_metrics")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
