//! Library reconciliation: upstream movies/series into `library_items`.

use crate::connectors::radarr::RadarrMovie;
use crate::connectors::sonarr::SonarrSeries;
use crate::connectors::ServiceKind;
use crate::db::library::{self, LibraryRefresh, NewLibraryItem};
use crate::db::MediaType;
use crate::error::Result;
use crate::format::{human_size, select_poster, time_ago};
use crate::torrents::HistoryIndex;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

/// A movie or series normalised across download managers.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEntity {
    pub external_id: i64,
    pub title: String,
    pub year: i64,
    pub media_type: MediaType,
    pub added_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub quality: Option<String>,
    pub poster_url: Option<String>,
    pub file_count: i64,
    pub episode_count: i64,
    pub monitored: bool,
}

impl From<&RadarrMovie> for UpstreamEntity {
    fn from(movie: &RadarrMovie) -> Self {
        Self {
            external_id: movie.id,
            title: movie.title.trim().to_string(),
            year: movie.year,
            media_type: MediaType::Movie,
            added_at: movie.added_at(),
            size_bytes: movie.size_bytes(),
            quality: movie.quality_name(),
            poster_url: select_poster(&movie.images),
            file_count: if movie.has_file { 1 } else { 0 },
            episode_count: 0,
            monitored: movie.monitored,
        }
    }
}

impl From<&SonarrSeries> for UpstreamEntity {
    fn from(series: &SonarrSeries) -> Self {
        let stats = &series.statistics;
        Self {
            external_id: series.id,
            title: series.title.trim().to_string(),
            year: series.year,
            media_type: MediaType::Tv,
            added_at: series.added_at(),
            size_bytes: stats.size_on_disk,
            quality: None,
            poster_url: select_poster(&series.images),
            file_count: stats.episode_file_count,
            episode_count: stats.episode_count.max(stats.total_episode_count),
            monitored: series.monitored,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LibraryPassReport {
    pub inserted: usize,
    pub updated: usize,
    pub links_added: usize,
    pub skipped: usize,
}

impl LibraryPassReport {
    pub fn records(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Upsert every entity added after `recent_cutoff` by natural key and record
/// its torrents from the history index.
///
/// Records without a title or a usable added date are skipped; database errors abort.
pub async fn reconcile_library(
    conn: &mut SqliteConnection,
    service: ServiceKind,
    entities: &[UpstreamEntity],
    index: &HistoryIndex,
    recent_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<LibraryPassReport> {
    let mut report = LibraryPassReport::default();

    for entity in entities {
        if entity.title.is_empty() {
            warn!(service = %service, id = entity.external_id, "Skipping record without title");
            report.skipped += 1;
            continue;
        }
        let Some(added_at) = entity.added_at else {
            warn!(service = %service, title = %entity.title, "Skipping record without added date");
            report.skipped += 1;
            continue;
        };
        if added_at < recent_cutoff {
            continue;
        }

        let links = index.links_for(entity.external_id);
        let primary_hash = index.primary_hash(entity.external_id).map(String::from);
        let added_ago = Some(time_ago(added_at, now));

        let item_id =
            match library::find_by_natural_key(conn, &entity.title, entity.year, entity.media_type)
                .await?
            {
                Some(existing) => {
                    let update = LibraryRefresh {
                        size_bytes: entity.size_bytes,
                        size: human_size(entity.size_bytes),
                        quality: entity.quality.clone(),
                        added_ago,
                        poster_url: entity.poster_url.clone(),
                        file_count: entity.file_count,
                        episode_count: entity.episode_count,
                        monitored: entity.monitored,
                        torrent_hash: primary_hash,
                    };
                    library::refresh(conn, existing.id, &update, now).await?;
                    report.updated += 1;
                    existing.id
                }
                None => {
                    let item = NewLibraryItem {
                        title: entity.title.clone(),
                        year: entity.year,
                        media_type: entity.media_type,
                        source_service: service.to_string(),
                        external_id: entity.external_id,
                        size_bytes: entity.size_bytes,
                        size: human_size(entity.size_bytes),
                        quality: entity.quality.clone(),
                        added_at: Some(added_at),
                        added_ago,
                        poster_url: entity.poster_url.clone(),
                        file_count: entity.file_count,
                        episode_count: entity.episode_count,
                        monitored: entity.monitored,
                        torrent_hash: primary_hash,
                    };
                    let id = library::insert(conn, &item, now).await?;
                    debug!(service = %service, title = %entity.title, id, "New library item");
                    report.inserted += 1;
                    id
                }
            };

        for link in links {
            if library::upsert_torrent_link(conn, item_id, link, now).await? {
                report.links_added += 1;
            }
        }
    }

    Ok(report)
}
