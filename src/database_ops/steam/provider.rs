use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::database_ops::models::Pulse;
use crate::database_ops::sources::Storefront;
use crate::normalization::title::title_similarity;
use crate::util::env::{env_opt, env_parse};

const STEAM_STORE_BASE: &str = "https://store.steampowered.com";
const STEAM_API_BASE: &str = "https://api.steampowered.com";

/// Env: STEAM_THROTTLE_MS (default 500), STEAM_LANGUAGE (default english),
/// STEAM_COUNTRY (default US), HTTP_TIMEOUT_SECS (default 10)
#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub throttle_ms: u64,
    pub language: String,
    pub country: String,
    pub timeout_secs: u64,
    pub store_base: String,
    pub api_base: String,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 500,
            language: "english".into(),
            country: "US".into(),
            timeout_secs: 10,
            store_base: STEAM_STORE_BASE.into(),
            api_base: STEAM_API_BASE.into(),
        }
    }
}

impl SteamConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            throttle_ms: env_parse("STEAM_THROTTLE_MS", base.throttle_ms),
            language: normalize_language(
                &env_opt("STEAM_LANGUAGE").unwrap_or(base.language),
            ),
            country: env_opt("STEAM_COUNTRY")
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(base.country),
            timeout_secs: env_parse("HTTP_TIMEOUT_SECS", base.timeout_secs).max(1),
            ..base
        }
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Deserialize)]
struct StoreSearchResp {
    #[serde(default)]
    items: Vec<StoreSearchItem>,
}

#[derive(Debug, Deserialize)]
struct StoreSearchItem {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerCountWrapper {
    response: Option<PlayerCount>,
}

#[derive(Debug, Deserialize)]
struct PlayerCount {
    #[serde(default)]
    result: Option<i64>,
    #[serde(default)]
    player_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    #[serde(default)]
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    #[serde(default)]
    is_free: Option<bool>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    genres: Option<Vec<GenreEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(rename = "final")]
    final_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GenreEntry {
    description: Option<String>,
}

pub struct SteamProvider {
    client: Client,
    cfg: SteamConfig,
}

impl SteamProvider {
    pub fn new(cfg: SteamConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("gamefinder-sync/steam")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to construct Steam HTTP client")?;
        Ok(Self { client, cfg })
    }

    pub fn new_from_env() -> Result<Self> {
        Self::new(SteamConfig::from_env())
    }

    async fn app_details(&self, app_id: i64, filters: Option<&str>) -> Option<Value> {
        let url = format!("{}/api/appdetails", self.cfg.store_base);
        let appids = app_id.to_string();
        let mut query = vec![
            ("appids", appids.as_str()),
            ("cc", self.cfg.country.as_str()),
            ("l", self.cfg.language.as_str()),
        ];
        if let Some(f) = filters {
            query.push(("filters", f));
        }
        get_with_backoff_json(&self.client, &url, &query).await
    }
}

#[async_trait::async_trait]
impl Storefront for SteamProvider {
    fn name(&self) -> &'static str {
        "steam"
    }

    async fn search_app_id(&self, term: &str) -> Option<i64> {
        tokio::time::sleep(self.cfg.throttle()).await;
        let url = format!("{}/api/storesearch/", self.cfg.store_base);
        let body = get_with_backoff_json(
            &self.client,
            &url,
            &[
                ("term", term),
                ("l", self.cfg.language.as_str()),
                ("cc", self.cfg.country.as_str()),
            ],
        )
        .await;
        let Some(body) = body else {
            warn!(target = "steam", term, "storesearch request failed");
            return None;
        };
        let found = best_search_hit(&body, term);
        debug!(target = "steam", term, app_id = ?found, "storesearch");
        found
    }

    async fn fetch_pulse(&self, app_id: i64) -> Pulse {
        let url = format!(
            "{}/ISteamUserStats/GetNumberOfCurrentPlayers/v1/",
            self.cfg.api_base
        );
        let appid = app_id.to_string();
        let current_online = match get_with_backoff_json(&self.client, &url, &[("appid", appid.as_str())])
            .await
        {
            Some(v) => parse_player_count(&v),
            None => {
                warn!(target = "steam", app_id, "player count request failed");
                0
            }
        };
        let price = match self.app_details(app_id, Some("price_overview")).await {
            Some(v) => parse_price(&v, app_id),
            None => {
                warn!(target = "steam", app_id, "price request failed");
                None
            }
        };
        Pulse {
            current_online,
            price,
        }
    }

    async fn fetch_tags(&self, app_id: i64) -> Result<Vec<String>> {
        let body = self
            .app_details(app_id, None)
            .await
            .ok_or_else(|| anyhow!("appdetails request failed for app {app_id}"))?;
        Ok(parse_genres(&body, app_id))
    }
}

/// Highest-similarity candidate from a storesearch payload; ties keep upstream order.
fn best_search_hit(body: &Value, term: &str) -> Option<i64> {
    let resp: StoreSearchResp = serde_json::from_value(body.clone()).ok()?;
    let mut best: Option<(i64, f64)> = None;
    for item in resp.items {
        let Some(id) = item.id else { continue };
        let score = item
            .name
            .as_deref()
            .map(|n| title_similarity(n, term))
            .unwrap_or(0.0);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((id, score));
        }
    }
    best.map(|(id, _)| id)
}

fn parse_player_count(body: &Value) -> i64 {
    serde_json::from_value::<PlayerCountWrapper>(body.clone())
        .ok()
        .and_then(|w| w.response)
        .filter(|r| r.result == Some(1))
        .and_then(|r| r.player_count)
        .unwrap_or(0)
}

fn app_data(body: &Value, app_id: i64) -> Option<AppData> {
    let entry = body.get(app_id.to_string())?;
    let wrapper: AppDetailsWrapper = serde_json::from_value(entry.clone()).ok()?;
    if !wrapper.success {
        return None;
    }
    wrapper.data
}

/// Free titles cost 0.0; otherwise the final price in cents scaled to units.
fn parse_price(body: &Value, app_id: i64) -> Option<f64> {
    let data = app_data(body, app_id)?;
    if data.is_free.unwrap_or(false) {
        return Some(0.0);
    }
    let cents = data.price_overview?.final_cents.unwrap_or(0);
    Some(cents as f64 / 100.0)
}

fn parse_genres(body: &Value, app_id: i64) -> Vec<String> {
    app_data(body, app_id)
        .and_then(|d| d.genres)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|g| g.description)
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

async fn get_with_backoff_json(
    client: &Client,
    url: &str,
    query_pairs: &[(&str, &str)],
) -> Option<Value> {
    let delays = [5u64, 10, 15, 20];
    let mut attempt: usize = 0;
    loop {
        let mut req = client.get(url).header("Accept", "application/json");
        if !query_pairs.is_empty() {
            req = req.query(&query_pairs);
        }
        let resp = req.send().await.ok()?;
        let status = resp.status();
        if status.as_u16() != 429 {
            if !status.is_success() {
                return None;
            }
            return resp.json::<Value>().await.ok();
        }
        if attempt >= delays.len() {
            return None;
        }
        let mut sleep_secs = delays[attempt];
        if let Some(retry_after) = resp
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
        {
            if retry_after > sleep_secs {
                sleep_secs = retry_after;
            }
        }
        attempt += 1;
        tokio::time::sleep(Duration::from_secs(sleep_secs)).await;
    }
}

fn normalize_language(lang: &str) -> String {
    let mut s = lang.to_ascii_lowercase().replace([' ', '-'], "_");
    if s.is_empty() {
        s = "english".into();
    }
    s
}
