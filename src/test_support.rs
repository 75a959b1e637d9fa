//! In-process fakes for the upstream adapters.
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::database_ops::models::{GameRecord, ImportMode, Pulse};
use crate::database_ops::sources::{AccessToken, CatalogSource, Storefront};
use crate::util::db::Db;

#[derive(Default)]
pub struct FakeStorefront {
    hits: HashMap<String, i64>,
    pulses: HashMap<i64, Pulse>,
    tags: HashMap<i64, Vec<String>>,
    failing_tags: HashSet<i64>,
    searches: Mutex<Vec<String>>,
    pulse_calls: Mutex<Vec<i64>>,
    cancel_on_pulse: Option<(i64, CancellationToken)>,
}

impl FakeStorefront {
    pub fn with_search_hit(mut self, term: &str, app_id: i64) -> Self {
        self.hits.insert(term.to_string(), app_id);
        self
    }

    pub fn with_pulse(mut self, app_id: i64, pulse: Pulse) -> Self {
        self.pulses.insert(app_id, pulse);
        self
    }

    pub fn with_tags(mut self, app_id: i64, tags: &[&str]) -> Self {
        self.tags
            .insert(app_id, tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_failing_tags(mut self, app_id: i64) -> Self {
        self.failing_tags.insert(app_id);
        self
    }

    /// Cancel `token` while the pulse for `app_id` is being fetched.
    pub fn cancelling_on_pulse(mut self, app_id: i64, token: CancellationToken) -> Self {
        self.cancel_on_pulse = Some((app_id, token));
        self
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }

    pub fn pulse_calls(&self) -> Vec<i64> {
        self.pulse_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Storefront for FakeStorefront {
    fn name(&self) -> &'static str {
        "fake-store"
    }

    async fn search_app_id(&self, term: &str) -> Option<i64> {
        self.searches.lock().unwrap().push(term.to_string());
        self.hits.get(term).copied()
    }

    async fn fetch_pulse(&self, app_id: i64) -> Pulse {
        self.pulse_calls.lock().unwrap().push(app_id);
        if let Some((target, token)) = &self.cancel_on_pulse {
            if *target == app_id {
                token.cancel();
            }
        }
        self.pulses.get(&app_id).copied().unwrap_or_default()
    }

    async fn fetch_tags(&self, app_id: i64) -> Result<Vec<String>> {
        if self.failing_tags.contains(&app_id) {
            return Err(anyhow!("tags unavailable for {app_id}"));
        }
        Ok(self.tags.get(&app_id).cloned().unwrap_or_default())
    }
}

/// Scripted catalog: each `fetch_page` pops the next page in order.
#[derive(Default)]
pub struct FakeCatalogSource {
    pages: Mutex<VecDeque<Result<Vec<GameRecord>, String>>>,
    calls: Mutex<Vec<(usize, usize)>>,
    token_error: Option<String>,
    gate: Option<Arc<Semaphore>>,
    cancel_on_fetch: Option<CancellationToken>,
    max_page_size: Option<usize>,
}

impl FakeCatalogSource {
    pub fn with_page(self, records: Vec<GameRecord>) -> Self {
        self.pages.lock().unwrap().push_back(Ok(records));
        self
    }

    pub fn with_failing_page(self, error: &str) -> Self {
        self.pages.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    pub fn with_token_error(mut self, error: &str) -> Self {
        self.token_error = Some(error.to_string());
        self
    }

    /// Every fetch waits for one permit on `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Cancel `token` while the first page is being served.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(token);
        self
    }

    /// Pages are truncated to `max`, the way a real upstream caps `limit`.
    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = Some(max);
        self
    }

    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CatalogSource for FakeCatalogSource {
    fn name(&self) -> &'static str {
        "fake-catalog"
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size.unwrap_or(usize::MAX)
    }

    async fn acquire_token(&self) -> Result<AccessToken> {
        match &self.token_error {
            Some(err) => Err(anyhow!(err.clone())),
            None => Ok(AccessToken::new("fake-token")),
        }
    }

    async fn fetch_page(
        &self,
        _token: &AccessToken,
        _mode: ImportMode,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GameRecord>> {
        self.calls.lock().unwrap().push((offset, limit));
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        let next = self.pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut records)) => {
                records.truncate(limit.min(self.max_page_size()));
                Ok(records)
            }
            Some(Err(err)) => Err(anyhow!(err)),
            None => Ok(Vec::new()),
        }
    }
}

/// Record with a primary genre list, ready for reconciliation.
pub fn record(igdb_id: i64, name: &str, genres: &[&str]) -> GameRecord {
    let mut rec = GameRecord::named(igdb_id, name);
    rec.genres = genres.iter().map(|g| g.to_string()).collect();
    rec.developer = Some("Test Studio".to_string());
    rec
}

/// File-backed catalog behind a real multi-connection pool. The database
/// lives as long as the returned `TempDir`.
pub async fn file_db(max_connections: u32) -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("catalog.db").display());
    let db = Db::connect(&url, max_connections).await.unwrap();
    (dir, db)
}
