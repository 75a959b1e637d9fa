//! Seams between the sync jobs and the two upstreams.
//!
//! The jobs only talk to these traits; [`IgdbService`](super::igdb::client::IgdbService)
//! and [`SteamProvider`](super::steam::provider::SteamProvider) are the live
//! implementations.
use anyhow::Result;
use std::fmt;
use tracing::debug;

use crate::database_ops::models::{GameRecord, ImportMode, Pulse};
use crate::normalization::title::clean_game_title;

/// Bearer token for the metadata catalog, valid for one job run.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Paged access to the game-metadata catalog.
#[async_trait::async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Largest `limit` one page request honours.
    fn max_page_size(&self) -> usize {
        usize::MAX
    }

    /// Credential exchange; called once per job run.
    async fn acquire_token(&self) -> Result<AccessToken>;

    /// One page of normalized records. An `Err` means the upstream request
    /// failed; an empty vec means the upstream has nothing more.
    async fn fetch_page(
        &self,
        token: &AccessToken,
        mode: ImportMode,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GameRecord>>;
}

/// Unauthenticated storefront lookups.
#[async_trait::async_trait]
pub trait Storefront: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fuzzy name search; `None` when nothing matched or the request failed.
    async fn search_app_id(&self, term: &str) -> Option<i64>;

    /// Current player count and price. Failures degrade to defaults.
    async fn fetch_pulse(&self, app_id: i64) -> Pulse;

    /// Storefront genre labels for an app.
    async fn fetch_tags(&self, app_id: i64) -> Result<Vec<String>>;
}

/// Two-tier storefront id resolution.
///
/// The id parsed from the record's own store link wins. Otherwise the
/// storefront search runs with the raw title, then with the cleaned title when
/// cleaning changed anything.
pub async fn resolve_store_id(storefront: &dyn Storefront, record: &GameRecord) -> Option<i64> {
    if let Some(id) = record.steam_app_id {
        return Some(id);
    }
    if let Some(id) = storefront.search_app_id(&record.name).await {
        debug!(title = %record.name, app_id = id, "store id found by title search");
        return Some(id);
    }
    let cleaned = clean_game_title(&record.name);
    if cleaned.is_empty() || cleaned == record.name {
        return None;
    }
    let found = storefront.search_app_id(&cleaned).await;
    if let Some(id) = found {
        debug!(title = %record.name, cleaned = %cleaned, app_id = id, "store id found by cleaned title");
    }
    found
}
