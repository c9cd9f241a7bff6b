use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    Users,
    Movies,
    Tv,
    MonitoredItems,
}

/// Monitoring counts reported by one download manager.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitoredCounts {
    pub total: i64,
    pub monitored: i64,
    pub downloaded: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatDetails {
    Users {
        administrators: i64,
        disabled: i64,
    },
    Library {
        items: i64,
        episodes: Option<i64>,
    },
    Monitored {
        movies: MonitoredCounts,
        series: MonitoredCounts,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct DashboardStatistic {
    pub id: i64,
    pub stat_type: StatType,
    pub total: i64,
    pub details: Json<StatDetails>,
    pub updated_at: DateTime<Utc>,
}

pub async fn upsert(
    conn: &mut SqliteConnection,
    stat_type: StatType,
    total: i64,
    details: &StatDetails,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO dashboard_statistics (stat_type, total, details, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(stat_type) DO UPDATE SET
            total = excluded.total,
            details = excluded.details,
            updated_at = excluded.updated_at",
    )
    .bind(stat_type)
    .bind(total)
    .bind(Json(details))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get(
    conn: &mut SqliteConnection,
    stat_type: StatType,
) -> Result<Option<DashboardStatistic>> {
    let row = sqlx::query_as::<_, DashboardStatistic>(
        "SELECT * FROM dashboard_statistics WHERE stat_type = ?",
    )
    .bind(stat_type)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<DashboardStatistic>> {
    let rows = sqlx::query_as::<_, DashboardStatistic>(
        "SELECT * FROM dashboard_statistics ORDER BY stat_type",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}
