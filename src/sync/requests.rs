//! Request-manager mirror.

use crate::db::requests::{self, RequestUpsert};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub upserted: usize,
    pub deleted: u64,
}

/// Make the local request table equal to `upstream`: upsert by external id, then
/// delete every row the listing no longer contains.
pub async fn mirror_requests(
    conn: &mut SqliteConnection,
    upstream: &[RequestUpsert],
    now: DateTime<Utc>,
) -> Result<MirrorReport> {
    for request in upstream {
        requests::upsert(conn, request, now).await?;
    }

    let keep: Vec<i64> = upstream.iter().map(|r| r.jellyseerr_id).collect();
    let deleted = requests::delete_missing(conn, &keep).await?;
    if deleted > 0 {
        info!(deleted, "Removed requests no longer present upstream");
    }

    Ok(MirrorReport {
        upserted: upstream.len(),
        deleted,
    })
}
