//! Download-history index: which torrents belong to which upstream movie/series.

use crate::hash::extract_torrent_hash;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// A history record normalised across Radarr and Sonarr.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    /// Upstream movie id or series id.
    pub entity_id: i64,
    pub episode_id: Option<i64>,
    pub season_number: Option<i64>,
    pub download_id: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// One torrent linked to an upstream entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashLink {
    pub hash: String,
    pub episode_id: Option<i64>,
    pub season_number: Option<i64>,
    pub is_season_pack: bool,
}

#[derive(Debug, Default)]
pub struct HistoryIndex {
    by_entity: HashMap<i64, Vec<HashLink>>,
}

impl HistoryIndex {
    /// Build the index from history records, newest first.
    ///
    /// A hash seen against more than one distinct episode id is a season pack:
    /// its links lose their episode id and carry `is_season_pack = true`.
    pub fn build(records: &[HistoryRecord]) -> Self {
        let mut episodes_by_hash: HashMap<String, BTreeSet<i64>> = HashMap::new();
        let mut seasons_by_hash: HashMap<String, BTreeSet<i64>> = HashMap::new();
        let mut order: HashMap<i64, Vec<String>> = HashMap::new();

        for record in records {
            let Some(hash) = record.download_id.as_deref().and_then(extract_torrent_hash) else {
                continue;
            };

            let hashes = order.entry(record.entity_id).or_default();
            if !hashes.contains(&hash) {
                hashes.push(hash.clone());
            }

            let episodes = episodes_by_hash.entry(hash.clone()).or_default();
            if let Some(episode_id) = record.episode_id {
                episodes.insert(episode_id);
            }
            let seasons = seasons_by_hash.entry(hash).or_default();
            if let Some(season) = record.season_number {
                seasons.insert(season);
            }
        }

        let by_entity = order
            .into_iter()
            .map(|(entity_id, hashes)| {
                let links = hashes
                    .into_iter()
                    .map(|hash| {
                        let episodes = episodes_by_hash.get(&hash);
                        let is_season_pack = episodes.map(|e| e.len() > 1).unwrap_or(false);
                        let episode_id = if is_season_pack {
                            None
                        } else {
                            episodes.and_then(|e| e.iter().next().copied())
                        };
                        let season_number = seasons_by_hash
                            .get(&hash)
                            .filter(|s| s.len() == 1)
                            .and_then(|s| s.iter().next().copied());
                        HashLink {
                            hash,
                            episode_id,
                            season_number,
                            is_season_pack,
                        }
                    })
                    .collect();
                (entity_id, links)
            })
            .collect();

        Self { by_entity }
    }

    pub fn links_for(&self, entity_id: i64) -> &[HashLink] {
        self.by_entity
            .get(&entity_id)
            .map(|links| links.as_slice())
            .unwrap_or(&[])
    }

    /// The most recently grabbed hash for an entity.
    pub fn primary_hash(&self, entity_id: i64) -> Option<&str> {
        self.links_for(entity_id).first().map(|l| l.hash.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: &str = "1111111111111111111111111111111111111111";
    const G: &str = "2222222222222222222222222222222222222222";

    fn record(entity_id: i64, episode_id: Option<i64>, download_id: &str) -> HistoryRecord {
        HistoryRecord {
            entity_id,
            episode_id,
            season_number: Some(1),
            download_id: Some(download_id.to_string()),
            date: None,
        }
    }

    #[test]
    fn test_season_pack_detection() {
        let records = vec![
            record(7, Some(101), H),
            record(7, Some(102), &format!("qBittorrent-{}", H)),
            record(7, Some(103), G),
        ];
        let index = HistoryIndex::build(&records);
        let links = index.links_for(7);
        assert_eq!(links.len(), 2);

        let h = links.iter().find(|l| l.hash == H).unwrap();
        assert!(h.is_season_pack);
        assert_eq!(h.episode_id, None);
        assert_eq!(h.season_number, Some(1));

        let g = links.iter().find(|l| l.hash == G).unwrap();
        assert!(!g.is_season_pack);
        assert_eq!(g.episode_id, Some(103));
    }

    #[test]
    fn test_repeated_grab_of_same_episode_is_not_a_pack() {
        let records = vec![record(1, Some(5), H), record(1, Some(5), H)];
        let index = HistoryIndex::build(&records);
        assert_eq!(index.links_for(1).len(), 1);
        assert!(!index.links_for(1)[0].is_season_pack);
    }

    #[test]
    fn test_primary_hash_is_newest() {
        let records = vec![record(3, None, G), record(3, None, H)];
        let index = HistoryIndex::build(&records);
        assert_eq!(index.primary_hash(3), Some(G));
        assert_eq!(index.primary_hash(4), None);
    }

    #[test]
    fn test_unmatched_download_ids_are_skipped() {
        let mut usenet = record(9, Some(1), "SABnzbd_nzo_xyz");
        usenet.download_id = Some("SABnzbd_nzo_xyz".into());
        let missing = HistoryRecord {
            download_id: None,
            ..record(9, Some(2), H)
        };
        let index = HistoryIndex::build(&[usenet, missing]);
        assert!(index.is_empty());
    }
}
