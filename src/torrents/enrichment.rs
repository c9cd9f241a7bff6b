//! Lazy enrichment of junction rows with state from the download client.

use super::{aggregate, summarize_single, TorrentState};
use crate::db::{library, Db};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Anything that can report torrent state for a batch of hashes.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    /// Hashes the client does not know are simply absent from the result.
    async fn fetch_states(&self, hashes: &[String]) -> Result<Vec<TorrentState>>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub requested: usize,
    pub fetched: usize,
    pub items_updated: usize,
}

impl EnrichmentReport {
    pub fn missing(&self) -> usize {
        self.requested.saturating_sub(self.fetched)
    }
}

/// Fetch state for every hash still lacking a complete one, in a single batch,
/// and re-aggregate the items that own them.
pub async fn enrich_pending(
    db: &Db,
    source: &dyn TorrentSource,
    now: DateTime<Utc>,
) -> Result<EnrichmentReport> {
    let pending = {
        let mut conn = db.acquire().await?;
        library::pending_enrichment_hashes(&mut conn).await?
    };

    if pending.is_empty() {
        debug!("No torrents awaiting enrichment");
        return Ok(EnrichmentReport::default());
    }

    let states = source.fetch_states(&pending).await?;
    let mut report = EnrichmentReport {
        requested: pending.len(),
        ..Default::default()
    };

    let mut tx = db.begin().await?;
    let mut affected = BTreeSet::new();
    let mut seen = BTreeSet::new();

    for mut state in states {
        state.hash = state.hash.to_ascii_uppercase();
        if !seen.insert(state.hash.clone()) {
            continue;
        }
        report.fetched += 1;

        for item_id in library::set_link_state(&mut tx, &state, now).await? {
            affected.insert(item_id);
        }

        for item_id in library::legacy_items_for_hash(&mut tx, &state.hash).await? {
            library::set_summary(&mut tx, item_id, &summarize_single(&state), now).await?;
            report.items_updated += 1;
        }
    }

    for item_id in affected {
        let states = library::enriched_states(&mut tx, item_id).await?;
        if let Some(summary) = aggregate(&states) {
            library::set_summary(&mut tx, item_id, &summary, now).await?;
            report.items_updated += 1;
        }
    }

    tx.commit().await?;

    info!(
        requested = report.requested,
        fetched = report.fetched,
        missing = report.missing(),
        items = report.items_updated,
        "Torrent enrichment finished"
    );
    Ok(report)
}
