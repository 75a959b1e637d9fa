use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Catalog schema. Every statement is idempotent so it runs on each connect.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS developers (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    title   TEXT NOT NULL UNIQUE,
    country TEXT NOT NULL DEFAULT 'Unknown',
    founded TEXT
);

CREATE TABLE IF NOT EXISTS genres (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS games (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    title          TEXT NOT NULL,
    igdb_id        INTEGER UNIQUE,
    steam_app_id   INTEGER UNIQUE,
    release_ts     INTEGER,
    cover_url      TEXT,
    dev_game       INTEGER REFERENCES developers(id) ON DELETE RESTRICT,
    is_available   INTEGER NOT NULL DEFAULT 1,
    current_online INTEGER,
    current_price  REAL
);
CREATE INDEX IF NOT EXISTS idx_games_release_ts ON games(release_ts);
CREATE INDEX IF NOT EXISTS idx_games_dev_game ON games(dev_game);

CREATE TABLE IF NOT EXISTS game_details (
    game_id     INTEGER PRIMARY KEY REFERENCES games(id) ON DELETE CASCADE,
    description TEXT,
    trailer_url TEXT
);

CREATE TABLE IF NOT EXISTS game_genres (
    game_id    INTEGER NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    genre_id   INTEGER NOT NULL REFERENCES genres(id) ON DELETE CASCADE,
    is_primary INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (game_id, genre_id)
);
CREATE UNIQUE INDEX IF NOT EXISTS one_primary_genre_per_game
    ON game_genres(game_id) WHERE is_primary = 1;
CREATE INDEX IF NOT EXISTS idx_game_genres_genre_id ON game_genres(genre_id);
"#;

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open the catalog store and apply the schema.
    ///
    /// `sqlite::memory:` databases are pinned to one connection, since every
    /// new connection would otherwise see its own empty database.
    // SECURITY: never include raw DSNs in tracing spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| "invalid sqlite database url")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .acquire_timeout(Duration::from_secs(10));
        if in_memory {
            // Dropping the last connection would drop the database with it.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .context("failed to open catalog database")?;
        info!(in_memory, "connected to db");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Fresh in-memory catalog, used by tests and dry runs.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("applying catalog schema")?;
        Ok(())
    }

    /// Transaction holding the write lock from BEGIN. Use it for every unit of
    /// work that reads before it writes: a deferred transaction fails with
    /// SQLITE_BUSY_SNAPSHOT if another writer commits in between, and
    /// `busy_timeout` does not cover that case.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("opening write transaction")
    }

    /// Cheap connectivity check for `/health`.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_is_reapplicable() {
        let db = Db::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        assert!(db.ping().await);
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["developers", "game_details", "game_genres", "games", "genres"]
        );
    }
}
