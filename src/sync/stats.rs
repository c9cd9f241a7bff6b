//! Dashboard statistic rows.

use crate::connectors::jellyfin::{ItemCounts, JellyfinUser};
use crate::db::stats::{self, MonitoredCounts, StatDetails, StatType};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Users, movies and tv rows from a Jellyfin snapshot. Returns rows written.
pub async fn store_media_server_stats(
    conn: &mut SqliteConnection,
    users: &[JellyfinUser],
    counts: &ItemCounts,
    now: DateTime<Utc>,
) -> Result<usize> {
    let users_details = StatDetails::Users {
        administrators: users.iter().filter(|u| u.policy.is_administrator).count() as i64,
        disabled: users.iter().filter(|u| u.policy.is_disabled).count() as i64,
    };
    stats::upsert(conn, StatType::Users, users.len() as i64, &users_details, now).await?;

    let movies = StatDetails::Library {
        items: counts.movie_count,
        episodes: None,
    };
    stats::upsert(conn, StatType::Movies, counts.movie_count, &movies, now).await?;

    let tv = StatDetails::Library {
        items: counts.series_count,
        episodes: Some(counts.episode_count),
    };
    stats::upsert(conn, StatType::Tv, counts.series_count, &tv, now).await?;

    Ok(3)
}

/// Single monitored-items row summing both download managers. A missing
/// service contributes zeroes.
pub async fn store_monitored(
    conn: &mut SqliteConnection,
    movies: Option<MonitoredCounts>,
    series: Option<MonitoredCounts>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let movies = movies.unwrap_or_default();
    let series = series.unwrap_or_default();
    let total = movies.monitored + series.monitored;

    stats::upsert(
        conn,
        StatType::MonitoredItems,
        total,
        &StatDetails::Monitored { movies, series },
        now,
    )
    .await?;

    Ok(total)
}
