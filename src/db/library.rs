use super::MediaType;
use crate::error::Result;
use crate::torrents::{HashLink, TorrentState, TorrentSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::SqliteConnection;

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct LibraryItem {
    pub id: i64,
    pub title: String,
    pub year: i64,
    pub media_type: MediaType,
    pub source_service: String,
    pub external_id: Option<i64>,
    pub size_bytes: i64,
    pub size: String,
    pub quality: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub added_ago: Option<String>,
    pub poster_url: Option<String>,
    pub file_count: i64,
    pub episode_count: i64,
    pub monitored: bool,
    pub torrent_hash: Option<String>,
    pub torrent_info: Option<Json<TorrentSummary>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct LibraryItemTorrent {
    pub id: i64,
    pub library_item_id: i64,
    pub torrent_hash: String,
    pub episode_id: Option<i64>,
    pub season_number: Option<i64>,
    pub is_season_pack: bool,
    pub torrent_info: Option<Json<TorrentState>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a library item seen for the first time.
#[derive(Debug, Clone)]
pub struct NewLibraryItem {
    pub title: String,
    pub year: i64,
    pub media_type: MediaType,
    pub source_service: String,
    pub external_id: i64,
    pub size_bytes: i64,
    pub size: String,
    pub quality: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub added_ago: Option<String>,
    pub poster_url: Option<String>,
    pub file_count: i64,
    pub episode_count: i64,
    pub monitored: bool,
    pub torrent_hash: Option<String>,
}

/// Mutable fields refreshed on every sync pass.
#[derive(Debug, Clone)]
pub struct LibraryRefresh {
    pub size_bytes: i64,
    pub size: String,
    pub quality: Option<String>,
    pub added_ago: Option<String>,
    pub poster_url: Option<String>,
    pub file_count: i64,
    pub episode_count: i64,
    pub monitored: bool,
    pub torrent_hash: Option<String>,
}

const ITEM_COLUMNS: &str = "id, title, year, media_type, source_service, external_id, size_bytes, size,
    quality, added_at, added_ago, poster_url, file_count, episode_count, monitored,
    torrent_hash, torrent_info, created_at, updated_at";

pub async fn find_by_natural_key(
    conn: &mut SqliteConnection,
    title: &str,
    year: i64,
    media_type: MediaType,
) -> Result<Option<LibraryItem>> {
    let item = sqlx::query_as::<_, LibraryItem>(&format!(
        "SELECT {} FROM library_items WHERE title = ? AND year = ? AND media_type = ?",
        ITEM_COLUMNS
    ))
    .bind(title)
    .bind(year)
    .bind(media_type)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<LibraryItem>> {
    let item = sqlx::query_as::<_, LibraryItem>(&format!(
        "SELECT {} FROM library_items WHERE id = ?",
        ITEM_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(item)
}

pub async fn insert(
    conn: &mut SqliteConnection,
    item: &NewLibraryItem,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO library_items
         (title, year, media_type, source_service, external_id, size_bytes, size, quality,
          added_at, added_ago, poster_url, file_count, episode_count, monitored, torrent_hash,
          created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&item.title)
    .bind(item.year)
    .bind(item.media_type)
    .bind(&item.source_service)
    .bind(item.external_id)
    .bind(item.size_bytes)
    .bind(&item.size)
    .bind(&item.quality)
    .bind(item.added_at)
    .bind(&item.added_ago)
    .bind(&item.poster_url)
    .bind(item.file_count)
    .bind(item.episode_count)
    .bind(item.monitored)
    .bind(&item.torrent_hash)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Refresh an existing item. Size is only filled in while still zero, and a
/// stored `torrent_hash` is never replaced.
pub async fn refresh(
    conn: &mut SqliteConnection,
    id: i64,
    update: &LibraryRefresh,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE library_items SET
            size_bytes = CASE WHEN size_bytes = 0 THEN ? ELSE size_bytes END,
            size = CASE WHEN size_bytes = 0 THEN ? ELSE size END,
            quality = COALESCE(?, quality),
            added_ago = COALESCE(?, added_ago),
            poster_url = COALESCE(poster_url, ?),
            file_count = ?,
            episode_count = ?,
            monitored = ?,
            torrent_hash = COALESCE(torrent_hash, ?),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(update.size_bytes)
    .bind(&update.size)
    .bind(&update.quality)
    .bind(&update.added_ago)
    .bind(&update.poster_url)
    .bind(update.file_count)
    .bind(update.episode_count)
    .bind(update.monitored)
    .bind(&update.torrent_hash)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record a torrent for an item. Returns true when the row is new.
///
/// Season-pack status only ever moves from false to true; once a pack, the
/// row's episode id is cleared.
pub async fn upsert_torrent_link(
    conn: &mut SqliteConnection,
    library_item_id: i64,
    link: &HashLink,
    now: DateTime<Utc>,
) -> Result<bool> {
    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM library_item_torrents WHERE library_item_id = ? AND torrent_hash = ?",
    )
    .bind(library_item_id)
    .bind(&link.hash)
    .fetch_optional(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO library_item_torrents
         (library_item_id, torrent_hash, episode_id, season_number, is_season_pack, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(library_item_id, torrent_hash) DO UPDATE SET
            is_season_pack = MAX(is_season_pack, excluded.is_season_pack),
            episode_id = CASE
                WHEN MAX(is_season_pack, excluded.is_season_pack) = 1 THEN NULL
                ELSE COALESCE(episode_id, excluded.episode_id)
            END,
            season_number = COALESCE(season_number, excluded.season_number),
            updated_at = excluded.updated_at",
    )
    .bind(library_item_id)
    .bind(&link.hash)
    .bind(link.episode_id)
    .bind(link.season_number)
    .bind(link.is_season_pack)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(existing.is_none())
}

pub async fn torrent_links(
    conn: &mut SqliteConnection,
    library_item_id: i64,
) -> Result<Vec<LibraryItemTorrent>> {
    let rows = sqlx::query_as::<_, LibraryItemTorrent>(
        "SELECT * FROM library_item_torrents WHERE library_item_id = ? ORDER BY id",
    )
    .bind(library_item_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows)
}

/// Distinct hashes whose state still needs fetching: junction rows with no state
/// or an incomplete one, plus legacy items that have no junction rows at all.
pub async fn pending_enrichment_hashes(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT torrent_hash FROM library_item_torrents
         WHERE torrent_info IS NULL
            OR COALESCE(json_extract(torrent_info, '$.progress'), 0) < 100
         UNION
         SELECT li.torrent_hash FROM library_items li
         WHERE li.torrent_hash IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM library_item_torrents t WHERE t.library_item_id = li.id)
           AND (li.torrent_info IS NULL
                OR COALESCE(json_extract(li.torrent_info, '$.progress'), 0) < 100)
         ORDER BY 1",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Store fetched state on every junction row for `hash`; returns the owning item ids.
pub async fn set_link_state(
    conn: &mut SqliteConnection,
    state: &TorrentState,
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let ids: Vec<(i64,)> = sqlx::query_as(
        "UPDATE library_item_torrents SET torrent_info = ?, updated_at = ?
         WHERE torrent_hash = ?
         RETURNING library_item_id",
    )
    .bind(Json(state))
    .bind(now)
    .bind(&state.hash)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().map(|r| r.0).collect())
}

/// Items still tracked only through the legacy single hash.
pub async fn legacy_items_for_hash(
    conn: &mut SqliteConnection,
    hash: &str,
) -> Result<Vec<i64>> {
    let ids: Vec<(i64,)> = sqlx::query_as(
        "SELECT li.id FROM library_items li
         WHERE li.torrent_hash = ?
           AND NOT EXISTS (SELECT 1 FROM library_item_torrents t WHERE t.library_item_id = li.id)",
    )
    .bind(hash)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids.into_iter().map(|r| r.0).collect())
}

pub async fn enriched_states(
    conn: &mut SqliteConnection,
    library_item_id: i64,
) -> Result<Vec<TorrentState>> {
    let rows: Vec<(Json<TorrentState>,)> = sqlx::query_as(
        "SELECT torrent_info FROM library_item_torrents
         WHERE library_item_id = ? AND torrent_info IS NOT NULL
         ORDER BY id",
    )
    .bind(library_item_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.0 .0).collect())
}

pub async fn set_summary(
    conn: &mut SqliteConnection,
    library_item_id: i64,
    summary: &TorrentSummary,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE library_items SET torrent_info = ?, updated_at = ? WHERE id = ?")
        .bind(Json(summary))
        .bind(now)
        .bind(library_item_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn list_recent(conn: &mut SqliteConnection, limit: i64) -> Result<Vec<LibraryItem>> {
    let items = sqlx::query_as::<_, LibraryItem>(&format!(
        "SELECT {} FROM library_items ORDER BY added_at DESC, id DESC LIMIT ?",
        ITEM_COLUMNS
    ))
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(items)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM library_items")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
