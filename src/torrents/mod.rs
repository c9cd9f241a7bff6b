//! Per-item torrent tracking.
//!
//! A library item can be backed by several torrents (an upgrade, a season pack plus
//! single episodes, ...). Each junction row stores the raw state fetched from the
//! download client; the item's `torrent_info` is always a fold over those rows.

pub mod enrichment;
pub mod history;

pub use enrichment::{enrich_pending, EnrichmentReport, TorrentSource};
pub use history::{HashLink, HistoryIndex, HistoryRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentStatus {
    Seeding,
    Downloading,
    Error,
    Other,
}

impl TorrentStatus {
    /// Normalise a qBittorrent `state` string.
    pub fn from_client_state(state: &str) -> Self {
        match state {
            "uploading" | "stalledUP" | "queuedUP" | "forcedUP" | "checkingUP" | "pausedUP"
            | "stoppedUP" => TorrentStatus::Seeding,
            "downloading" | "stalledDL" | "queuedDL" | "forcedDL" | "metaDL" | "forcedMetaDL"
            | "allocating" | "checkingDL" | "pausedDL" | "stoppedDL" => TorrentStatus::Downloading,
            "error" | "missingFiles" => TorrentStatus::Error,
            _ => TorrentStatus::Other,
        }
    }
}

/// Raw per-torrent state as fetched from the download client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentState {
    pub hash: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<TorrentStatus>,
    #[serde(default)]
    pub raw_state: Option<String>,
    /// Percent, 0-100.
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub ratio: Option<f64>,
    #[serde(default)]
    pub size: Option<i64>,
    /// Seconds spent seeding.
    #[serde(default)]
    pub seeding_time: Option<i64>,
    #[serde(default)]
    pub completed_on: Option<DateTime<Utc>>,
}

impl TorrentState {
    pub fn is_complete(&self) -> bool {
        self.progress.map(|p| p >= 100.0).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Seeding,
    Downloading,
    Error,
    Mixed,
    Unknown,
}

/// Derived view stored on `library_items.torrent_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentSummary {
    pub name: String,
    pub status: SummaryStatus,
    pub ratio: f64,
    pub size: i64,
    pub seeding_time: i64,
    pub download_date: Option<DateTime<Utc>>,
    pub progress: f64,
    pub torrent_count: usize,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Fold the enriched states of one item's junction rows into a single summary.
///
/// Returns `None` when there is nothing to fold. The result depends only on the
/// multiset of states, so re-running it after every enrichment batch is safe.
pub fn aggregate(states: &[TorrentState]) -> Option<TorrentSummary> {
    if states.is_empty() {
        return None;
    }

    let ratios: Vec<f64> = states.iter().filter_map(|s| s.ratio).collect();
    let progresses: Vec<f64> = states.iter().filter_map(|s| s.progress).collect();
    let statuses: Vec<TorrentStatus> = states.iter().filter_map(|s| s.status).collect();

    let status = if !statuses.is_empty()
        && statuses.len() == states.len()
        && statuses.iter().all(|s| *s == TorrentStatus::Seeding)
    {
        SummaryStatus::Seeding
    } else if statuses.contains(&TorrentStatus::Downloading) {
        SummaryStatus::Downloading
    } else if !statuses.is_empty() {
        SummaryStatus::Mixed
    } else {
        SummaryStatus::Unknown
    };

    let progress = if states.iter().all(TorrentState::is_complete) {
        100.0
    } else {
        mean(&progresses).map(round1).unwrap_or(0.0)
    };

    let name = if states.len() == 1 {
        states[0].name.clone().unwrap_or_default()
    } else {
        format!("{} torrents", states.len())
    };

    Some(TorrentSummary {
        name,
        status,
        ratio: mean(&ratios).unwrap_or(0.0),
        size: states.iter().filter_map(|s| s.size).sum(),
        seeding_time: states.iter().filter_map(|s| s.seeding_time).max().unwrap_or(0),
        download_date: states.iter().filter_map(|s| s.completed_on).min(),
        progress,
        torrent_count: states.len(),
    })
}

/// Summary for items that only carry the legacy single `torrent_hash`.
pub fn summarize_single(state: &TorrentState) -> TorrentSummary {
    let status = match state.status {
        Some(TorrentStatus::Seeding) => SummaryStatus::Seeding,
        Some(TorrentStatus::Downloading) => SummaryStatus::Downloading,
        Some(TorrentStatus::Error) => SummaryStatus::Error,
        Some(TorrentStatus::Other) | None => SummaryStatus::Unknown,
    };

    TorrentSummary {
        name: state.name.clone().unwrap_or_default(),
        status,
        ratio: state.ratio.unwrap_or(0.0),
        size: state.size.unwrap_or(0),
        seeding_time: state.seeding_time.unwrap_or(0),
        download_date: state.completed_on,
        progress: state.progress.map(round1).unwrap_or(0.0),
        torrent_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state(hash: &str, status: TorrentStatus, progress: f64) -> TorrentState {
        TorrentState {
            hash: hash.to_string(),
            name: Some(format!("{}.mkv", hash)),
            status: Some(status),
            raw_state: None,
            progress: Some(progress),
            ratio: Some(1.0),
            size: Some(1000),
            seeding_time: Some(60),
            completed_on: None,
        }
    }

    #[test]
    fn test_client_state_mapping() {
        assert_eq!(TorrentStatus::from_client_state("stalledUP"), TorrentStatus::Seeding);
        assert_eq!(TorrentStatus::from_client_state("metaDL"), TorrentStatus::Downloading);
        assert_eq!(TorrentStatus::from_client_state("missingFiles"), TorrentStatus::Error);
        assert_eq!(TorrentStatus::from_client_state("moving"), TorrentStatus::Other);
    }

    #[test]
    fn test_empty_set_has_no_summary() {
        assert_eq!(aggregate(&[]), None);
    }

    #[test]
    fn test_all_seeding_complete() {
        let mut a = state("A", TorrentStatus::Seeding, 100.0);
        let mut b = state("B", TorrentStatus::Seeding, 100.0);
        a.ratio = Some(2.0);
        b.ratio = Some(1.0);
        a.seeding_time = Some(500);
        b.seeding_time = Some(90);
        a.completed_on = Some(Utc.timestamp_opt(2_000, 0).unwrap());
        b.completed_on = Some(Utc.timestamp_opt(1_000, 0).unwrap());

        let summary = aggregate(&[a, b]).unwrap();
        assert_eq!(summary.status, SummaryStatus::Seeding);
        assert_eq!(summary.ratio, 1.5);
        assert_eq!(summary.size, 2000);
        assert_eq!(summary.seeding_time, 500);
        assert_eq!(summary.download_date, Some(Utc.timestamp_opt(1_000, 0).unwrap()));
        assert_eq!(summary.progress, 100.0);
        assert_eq!(summary.torrent_count, 2);
        assert_eq!(summary.name, "2 torrents");
    }

    #[test]
    fn test_any_downloading_wins_over_seeding() {
        let summary = aggregate(&[
            state("A", TorrentStatus::Seeding, 100.0),
            state("B", TorrentStatus::Downloading, 33.4),
        ])
        .unwrap();
        assert_eq!(summary.status, SummaryStatus::Downloading);
        assert_eq!(summary.progress, 66.7);
    }

    #[test]
    fn test_mixed_and_unknown() {
        let summary = aggregate(&[
            state("A", TorrentStatus::Seeding, 100.0),
            state("B", TorrentStatus::Error, 100.0),
        ])
        .unwrap();
        assert_eq!(summary.status, SummaryStatus::Mixed);

        let bare = TorrentState {
            hash: "C".into(),
            name: None,
            status: None,
            raw_state: None,
            progress: None,
            ratio: None,
            size: None,
            seeding_time: None,
            completed_on: None,
        };
        let summary = aggregate(&[bare]).unwrap();
        assert_eq!(summary.status, SummaryStatus::Unknown);
        assert_eq!(summary.ratio, 0.0);
        assert_eq!(summary.progress, 0.0);
        assert_eq!(summary.name, "");
        assert_eq!(summary.torrent_count, 1);
    }

    #[test]
    fn test_single_row_uses_torrent_name() {
        let summary = aggregate(&[state("A", TorrentStatus::Seeding, 100.0)]).unwrap();
        assert_eq!(summary.name, "A.mkv");
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let rows = vec![
            state("A", TorrentStatus::Seeding, 100.0),
            state("B", TorrentStatus::Downloading, 12.5),
            state("C", TorrentStatus::Other, 40.0),
        ];
        let first = aggregate(&rows);
        let second = aggregate(&rows);
        assert_eq!(first, second);

        // Re-folding a round-tripped copy of the stored rows gives the same answer.
        let stored = serde_json::to_string(&rows).unwrap();
        let reloaded: Vec<TorrentState> = serde_json::from_str(&stored).unwrap();
        assert_eq!(aggregate(&reloaded), first);
    }

    #[test]
    fn test_summarize_single() {
        let summary = summarize_single(&state("A", TorrentStatus::Downloading, 42.25));
        assert_eq!(summary.torrent_count, 1);
        assert_eq!(summary.status, SummaryStatus::Downloading);
        assert_eq!(summary.progress, 42.3);
    }
}
