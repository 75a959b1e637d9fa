use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::database_ops::catalog::{
    ensure_developer, ensure_game_details, ensure_game_genre, ensure_genre, find_game_id_by_igdb,
    insert_game, NewGame,
};
use crate::util::db::Db;
use crate::database_ops::models::{initial_availability, GameRecord};
use crate::database_ops::sources::{resolve_store_id, Storefront};

/// What one reconciliation did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub game_id: i64,
    pub created: bool,
    pub genres_linked: usize,
}

/// Maps normalized upstream records onto catalog rows.
///
/// Every record is its own unit of work: a failure rolls back only that
/// record. Identity fields of an existing entry are never rewritten.
#[derive(Clone)]
pub struct Reconciler {
    db: Db,
    storefront: Arc<dyn Storefront>,
}

impl Reconciler {
    pub fn new(db: Db, storefront: Arc<dyn Storefront>) -> Self {
        Self { db, storefront }
    }

    #[instrument(skip(self, record), fields(title = %record.name, igdb_id = ?record.igdb_id))]
    pub async fn reconcile(&self, record: &GameRecord) -> Result<ReconcileOutcome> {
        let Some(igdb_id) = record.igdb_id else {
            bail!("record {:?} has no catalog id and cannot be deduplicated", record.name);
        };

        // Store-id lookup may hit the network, so it runs before the transaction.
        let already_known = {
            let mut conn = self.db.pool.acquire().await?;
            find_game_id_by_igdb(&mut conn, igdb_id).await?.is_some()
        };
        let steam_app_id = if already_known {
            None
        } else {
            resolve_store_id(self.storefront.as_ref(), record).await
        };

        let mut tx = self.db.begin_write().await?;

        let developer_id = match record.developer.as_deref() {
            Some(dev) => Some(ensure_developer(&mut *tx, dev).await?),
            None => None,
        };

        let (game_id, created) = match find_game_id_by_igdb(&mut *tx, igdb_id).await? {
            Some(id) => {
                debug!(game_id = id, "already present, identity fields left untouched");
                (id, false)
            }
            None => {
                let new_game = NewGame {
                    title: &record.name,
                    igdb_id,
                    steam_app_id,
                    release: record.release,
                    cover_url: record.cover_url.as_deref(),
                    developer_id,
                    is_available: initial_availability(record.release, Utc::now()),
                };
                let (id, created) = insert_game(&mut *tx, &new_game).await?;
                if created {
                    ensure_game_details(&mut *tx, id, record.summary.as_deref()).await?;
                    info!(game_id = id, steam_app_id = ?steam_app_id, "catalog entry created");
                }
                (id, created)
            }
        };

        let genres_linked = link_genres(&mut *tx, game_id, &record.genres).await?;

        tx.commit()
            .await
            .with_context(|| format!("committing {}", record.name))?;

        Ok(ReconcileOutcome {
            game_id,
            created,
            genres_linked,
        })
    }

    /// Attach storefront tags to an existing entry in one transaction.
    pub async fn attach_tags(&self, game_id: i64, tags: &[String]) -> Result<usize> {
        let mut tx = self.db.begin_write().await?;
        let linked = link_genres(&mut *tx, game_id, tags).await?;
        tx.commit().await?;
        Ok(linked)
    }
}

/// Find-or-create each genre and link it; the first name asks to be primary.
async fn link_genres(conn: &mut SqliteConnection, game_id: i64, names: &[String]) -> Result<usize> {
    let mut linked = 0;
    for (idx, name) in names.iter().enumerate() {
        let genre_id = ensure_genre(conn, name).await?;
        if ensure_game_genre(conn, game_id, genre_id, idx == 0).await? {
            linked += 1;
        }
    }
    Ok(linked)
}
