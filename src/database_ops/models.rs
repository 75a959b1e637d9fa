use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display name used when the metadata catalog omits one.
pub const UNKNOWN_GAME_TITLE: &str = "Unknown Game";

/// Normalized record produced by the metadata adapter.
///
/// Every upstream field is optional; defaults are applied while parsing so the
/// reconciliation engine never has to second-guess upstream shapes:
/// - `name` falls back to [`UNKNOWN_GAME_TITLE`]
/// - `genres` is empty when absent, first entry is the primary genre
/// - `steam_app_id` is only set when the record's own store link carried it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub igdb_id: Option<i64>,
    pub name: String,
    pub summary: Option<String>,
    pub release: Option<DateTime<Utc>>,
    pub cover_url: Option<String>,
    pub developer: Option<String>,
    pub genres: Vec<String>,
    pub steam_app_id: Option<i64>,
}

impl GameRecord {
    pub fn named(igdb_id: i64, name: &str) -> Self {
        Self {
            igdb_id: Some(igdb_id),
            name: name.to_string(),
            summary: None,
            release: None,
            cover_url: None,
            developer: None,
            genres: Vec::new(),
            steam_app_id: None,
        }
    }
}

/// Which slice of the metadata catalog a bulk import walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ImportMode {
    #[default]
    TopRated,
    Upcoming,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::TopRated => "top-rated",
            ImportMode::Upcoming => "upcoming",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top-rated" | "top_rated" | "top" => Ok(ImportMode::TopRated),
            "upcoming" => Ok(ImportMode::Upcoming),
            other => anyhow::bail!("unknown import mode: {other}"),
        }
    }
}

/// Live storefront snapshot for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Pulse {
    pub current_online: i64,
    pub price: Option<f64>,
}

/// Entry carrying a storefront id, as loaded by the pulse and tag jobs.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoreLinkedGame {
    pub id: i64,
    pub title: String,
    pub steam_app_id: i64,
}

/// Catalog row as the sync pipeline sees it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CatalogEntry {
    pub id: i64,
    pub title: String,
    pub igdb_id: Option<i64>,
    pub steam_app_id: Option<i64>,
    pub release_ts: Option<i64>,
    pub cover_url: Option<String>,
    pub dev_game: Option<i64>,
    pub is_available: bool,
    pub current_online: Option<i64>,
    pub current_price: Option<f64>,
}

/// Availability rule for a freshly imported entry: released (or undated)
/// entries are available, future releases wait for the sweeper.
pub fn initial_availability(release: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match release {
        Some(at) => at <= now,
        None => true,
    }
}
