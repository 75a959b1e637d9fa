//! Catalog store operations used by the sync pipeline.
//!
//! Functions that participate in a record's unit of work take a
//! `&mut SqliteConnection` so callers can hand in `&mut *tx`. Find-or-create
//! helpers follow an "insert, on conflict do nothing, select" shape, which keeps
//! them safe when two jobs race on the same name.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::util::db::Db;
use crate::database_ops::models::{CatalogEntry, Pulse, StoreLinkedGame};

/// Identity fields of a catalog entry about to be created.
#[derive(Debug, Clone)]
pub struct NewGame<'a> {
    pub title: &'a str,
    pub igdb_id: i64,
    pub steam_app_id: Option<i64>,
    pub release: Option<DateTime<Utc>>,
    pub cover_url: Option<&'a str>,
    pub developer_id: Option<i64>,
    pub is_available: bool,
}

pub async fn ensure_developer(conn: &mut SqliteConnection, title: &str) -> Result<i64> {
    sqlx::query("INSERT INTO developers (title) VALUES (?) ON CONFLICT(title) DO NOTHING")
        .bind(title)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting developer {title}"))?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM developers WHERE title = ?")
        .bind(title)
        .fetch_one(&mut *conn)
        .await?;
    debug!(developer = %title, developer_id = id, "developer resolved");
    Ok(id)
}

pub async fn ensure_genre(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO genres (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("inserting genre {name}"))?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM genres WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn find_game_id_by_igdb(conn: &mut SqliteConnection, igdb_id: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar("SELECT id FROM games WHERE igdb_id = ?")
        .bind(igdb_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

/// Insert a catalog entry keyed by its metadata id.
///
/// Returns the entry id and whether this call created it. A concurrent insert
/// of the same `igdb_id` resolves to the existing row instead of failing.
pub async fn insert_game(conn: &mut SqliteConnection, game: &NewGame<'_>) -> Result<(i64, bool)> {
    let inserted = sqlx::query(
        "INSERT INTO games (title, igdb_id, steam_app_id, release_ts, cover_url, dev_game, is_available)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(igdb_id) DO NOTHING",
    )
    .bind(game.title)
    .bind(game.igdb_id)
    .bind(game.steam_app_id)
    .bind(game.release.map(|at| at.timestamp()))
    .bind(game.cover_url)
    .bind(game.developer_id)
    .bind(game.is_available)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("inserting game {} (igdb_id={})", game.title, game.igdb_id))?;
    let id = find_game_id_by_igdb(conn, game.igdb_id)
        .await?
        .context("game row missing right after insert")?;
    Ok((id, inserted.rows_affected() == 1))
}

#[derive(Debug, Serialize)]
struct LocalizedText<'a> {
    en: Option<&'a str>,
    ru: Option<&'a str>,
}

pub async fn ensure_game_details(
    conn: &mut SqliteConnection,
    game_id: i64,
    summary: Option<&str>,
) -> Result<()> {
    let description: Value = serde_json::to_value(LocalizedText {
        en: summary,
        ru: None,
    })?;
    sqlx::query(
        "INSERT INTO game_details (game_id, description) VALUES (?, ?)
         ON CONFLICT(game_id) DO NOTHING",
    )
    .bind(game_id)
    .bind(description)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn game_has_primary_genre(conn: &mut SqliteConnection, game_id: i64) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM game_genres WHERE game_id = ? AND is_primary = 1")
            .bind(game_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Link a genre to a game unless the pair already exists.
///
/// A primary link is only written while the game has no primary genre yet, so
/// the one-primary-per-game index is never violated. Returns true when a new
/// link row was created.
pub async fn ensure_game_genre(
    conn: &mut SqliteConnection,
    game_id: i64,
    genre_id: i64,
    primary: bool,
) -> Result<bool> {
    let primary = primary && !game_has_primary_genre(conn, game_id).await?;
    let res = sqlx::query(
        "INSERT INTO game_genres (game_id, genre_id, is_primary) VALUES (?, ?, ?)
         ON CONFLICT(game_id, genre_id) DO NOTHING",
    )
    .bind(game_id)
    .bind(genre_id)
    .bind(primary)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// All entries that carry a storefront id, ordered by id.
pub async fn list_store_linked(db: &Db) -> Result<Vec<StoreLinkedGame>> {
    let rows = sqlx::query_as::<_, StoreLinkedGame>(
        "SELECT id, title, steam_app_id FROM games WHERE steam_app_id IS NOT NULL ORDER BY id",
    )
    .fetch_all(&db.pool)
    .await?;
    Ok(rows)
}

/// Overwrite both live fields, changed or not.
pub async fn update_live_fields(db: &Db, game_id: i64, pulse: &Pulse) -> Result<()> {
    sqlx::query("UPDATE games SET current_online = ?, current_price = ? WHERE id = ?")
        .bind(pulse.current_online)
        .bind(pulse.price)
        .bind(game_id)
        .execute(&db.pool)
        .await?;
    Ok(())
}

/// Flip `is_available` for every entry whose release moment is at or before
/// `now`. Single transaction; returns the promoted `(id, title)` pairs.
pub async fn promote_released(db: &Db, now: DateTime<Utc>) -> Result<Vec<(i64, String)>> {
    let cutoff = now.timestamp();
    let mut tx = db.begin_write().await?;
    let rows = sqlx::query(
        "SELECT id, title FROM games WHERE release_ts <= ? AND is_available = 0 ORDER BY id",
    )
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;
    let promoted: Vec<(i64, String)> = rows
        .into_iter()
        .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("title")))
        .collect();
    if !promoted.is_empty() {
        sqlx::query("UPDATE games SET is_available = 1 WHERE release_ts <= ? AND is_available = 0")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(promoted)
}

pub async fn get_game(db: &Db, game_id: i64) -> Result<Option<CatalogEntry>> {
    let row = sqlx::query_as::<_, CatalogEntry>(
        "SELECT id, title, igdb_id, steam_app_id, release_ts, cover_url, dev_game, is_available,
                current_online, current_price
         FROM games WHERE id = ?",
    )
    .bind(game_id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row)
}

/// Genre names linked to a game, primary first.
pub async fn game_genre_names(db: &Db, game_id: i64) -> Result<Vec<(String, bool)>> {
    let rows = sqlx::query(
        "SELECT g.name, gg.is_primary FROM game_genres gg
         JOIN genres g ON g.id = gg.genre_id
         WHERE gg.game_id = ?
         ORDER BY gg.is_primary DESC, g.name",
    )
    .bind(game_id)
    .fetch_all(&db.pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("name"), r.get::<bool, _>("is_primary")))
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub games: i64,
    pub developers: i64,
    pub genres: i64,
    pub store_linked: i64,
    pub unavailable: i64,
}

pub async fn catalog_counts(db: &Db) -> Result<CatalogCounts> {
    let row = sqlx::query(
        "SELECT
            (SELECT COUNT(*) FROM games) AS games,
            (SELECT COUNT(*) FROM developers) AS developers,
            (SELECT COUNT(*) FROM genres) AS genres,
            (SELECT COUNT(*) FROM games WHERE steam_app_id IS NOT NULL) AS store_linked,
            (SELECT COUNT(*) FROM games WHERE is_available = 0) AS unavailable",
    )
    .fetch_one(&db.pool)
    .await?;
    Ok(CatalogCounts {
        games: row.get("games"),
        developers: row.get("developers"),
        genres: row.get("genres"),
        store_linked: row.get("store_linked"),
        unavailable: row.get("unavailable"),
    })
}
