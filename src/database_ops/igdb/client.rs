use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::models::{GameRecord, ImportMode, UNKNOWN_GAME_TITLE};
use crate::database_ops::sources::{AccessToken, CatalogSource};
use crate::normalization::title::store_app_id_from_url;
use crate::util::env::{env_opt, env_parse};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const IGDB_GAMES_ENDPOINT: &str = "https://api.igdb.com/v4/games";
pub const IGDB_MAX_LIMIT: usize = 500;
/// Website category IGDB uses for Steam store links.
const IGDB_STEAM_WEBSITE_CATEGORY: i64 = 13;
const IGDB_GAME_FIELDS: &str = "name, summary, first_release_date, cover.url, genres.name, \
involved_companies.company.name, involved_companies.developer, websites.category, websites.type, websites.url";

#[derive(Debug, Clone)]
pub struct IgdbServiceConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub min_rating_count: u32,
    pub user_agent: String,
}

impl Default for IgdbServiceConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            max_retries: 2,
            backoff_ms: 1000,
            timeout_secs: 10,
            min_rating_count: 1000,
            user_agent: "gamefinder-sync/0.1".to_string(),
        }
    }
}

impl IgdbServiceConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            client_id: env_opt("TWITCH_CLIENT_ID"),
            client_secret: env_opt("TWITCH_CLIENT_SECRET"),
            max_retries: env_parse("IGDB_MAX_RETRIES", base.max_retries),
            backoff_ms: env_parse("IGDB_BACKOFF_MS", base.backoff_ms),
            timeout_secs: env_parse("HTTP_TIMEOUT_SECS", base.timeout_secs).max(1),
            min_rating_count: env_parse("IGDB_MIN_RATING_COUNT", base.min_rating_count),
            user_agent: env_opt("IGDB_USER_AGENT").unwrap_or(base.user_agent),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbImage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbInvolvedCompany {
    #[serde(default)]
    company: Option<IgdbNamed>,
    #[serde(default)]
    developer: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbWebsite {
    #[serde(default)]
    category: Option<i64>,
    // Newer API revisions replaced `category` with `type`.
    #[serde(default, rename = "type")]
    kind: Option<i64>,
    #[serde(default)]
    url: Option<String>,
}

/// Deserialize a field as `None` when upstream sends the wrong type for it.
fn lenient<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(de)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IgdbGame {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    summary: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    first_release_date: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    cover: Option<IgdbImage>,
    #[serde(default, deserialize_with = "lenient")]
    genres: Option<Vec<IgdbNamed>>,
    #[serde(default, deserialize_with = "lenient")]
    involved_companies: Option<Vec<IgdbInvolvedCompany>>,
    #[serde(default, deserialize_with = "lenient")]
    websites: Option<Vec<IgdbWebsite>>,
}

impl IgdbGame {
    fn into_record(self) -> GameRecord {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| UNKNOWN_GAME_TITLE.to_string());
        let genres = self
            .genres
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| g.name)
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
        GameRecord {
            igdb_id: self.id,
            name,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            release: self
                .first_release_date
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
            cover_url: self
                .cover
                .and_then(|c| c.url)
                .map(|u| normalize_cover_url(&u))
                .filter(|u| !u.is_empty()),
            developer: pick_developer(self.involved_companies.unwrap_or_default()),
            genres,
            steam_app_id: steam_id_from_websites(self.websites.as_deref().unwrap_or_default()),
        }
    }
}

/// The company flagged as developer, otherwise the first named company.
fn pick_developer(companies: Vec<IgdbInvolvedCompany>) -> Option<String> {
    let named: Vec<(String, bool)> = companies
        .into_iter()
        .filter_map(|ic| {
            let name = ic.company.and_then(|c| c.name)?;
            let name = name.trim().to_string();
            (!name.is_empty()).then_some((name, ic.developer.unwrap_or(false)))
        })
        .collect();
    named
        .iter()
        .find(|(_, dev)| *dev)
        .or_else(|| named.first())
        .map(|(name, _)| name.clone())
}

fn steam_id_from_websites(sites: &[IgdbWebsite]) -> Option<i64> {
    sites
        .iter()
        .filter(|s| s.category.or(s.kind) == Some(IGDB_STEAM_WEBSITE_CATEGORY))
        .filter_map(|s| s.url.as_deref())
        .find_map(store_app_id_from_url)
}

/// Upscale the thumbnail size token and make protocol-relative URLs absolute.
pub fn normalize_cover_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let sized = trimmed.replace("t_thumb", "t_1080p");
    if sized.starts_with("//") {
        format!("https:{sized}")
    } else {
        sized
    }
}

/// Apicalypse body for one page of the given mode.
pub fn build_games_query(
    mode: ImportMode,
    limit: usize,
    offset: usize,
    now: DateTime<Utc>,
    min_rating_count: u32,
) -> String {
    let limit = limit.clamp(1, IGDB_MAX_LIMIT);
    match mode {
        ImportMode::TopRated => format!(
            "fields {IGDB_GAME_FIELDS}; where rating_count > {min_rating_count}; sort rating desc; limit {limit}; offset {offset};"
        ),
        ImportMode::Upcoming => format!(
            "fields {IGDB_GAME_FIELDS}; where first_release_date > {}; sort first_release_date asc; limit {limit}; offset {offset};",
            now.timestamp()
        ),
    }
}

/// Parse an IGDB `/games` response body into normalized records.
///
/// Only a body that is not a JSON array fails. A field of the wrong type reads
/// as absent. An element that is not an object becomes an id-less record, so
/// it is reported as a per-record failure and the page keeps its length.
pub fn parse_games(body: &str) -> Result<Vec<GameRecord>> {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|err| anyhow!("failed to parse IGDB payload ({err})"))?;
    Ok(items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<IgdbGame>(item)
                .unwrap_or_else(|err| {
                    warn!(target = "igdb", error = %err, "malformed game element in page");
                    IgdbGame::default()
                })
                .into_record()
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct IgdbToken {
    access_token: String,
    expires_at: Instant,
}

pub struct IgdbService {
    cfg: IgdbServiceConfig,
    http: Client,
    token: Arc<Mutex<Option<IgdbToken>>>,
}

impl IgdbService {
    pub fn new(cfg: IgdbServiceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to construct IGDB HTTP client")?;
        Ok(Self {
            cfg,
            http,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn new_from_env() -> Result<Self> {
        Self::new(IgdbServiceConfig::from_env())
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let client_id = self
            .cfg
            .client_id
            .as_deref()
            .context("missing env: TWITCH_CLIENT_ID (required for IGDB)")?;
        let client_secret = self
            .cfg
            .client_secret
            .as_deref()
            .context("missing env: TWITCH_CLIENT_SECRET (required for IGDB)")?;
        Ok((client_id, client_secret))
    }

    async fn request_new_token(&self) -> Result<IgdbToken> {
        let (client_id, client_secret) = self.credentials()?;
        let response = self
            .http
            .post(TWITCH_TOKEN_URL)
            .query(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("requesting Twitch OAuth token")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "twitch token request failed (status={}): {}",
                status,
                text
            ));
        }
        let token: TwitchTokenResponse = response.json().await?;
        let ttl = token.expires_in.saturating_sub(30).max(30);
        Ok(IgdbToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }

    async fn execute_games_request(&self, token: &AccessToken, body: String) -> Result<String> {
        let (client_id, _) = self.credentials()?;
        let mut attempt = 0u32;
        loop {
            let response = self
                .http
                .post(IGDB_GAMES_ENDPOINT)
                .header("Client-ID", client_id)
                .header("Accept", "application/json")
                .header("Content-Type", "text/plain")
                .bearer_auth(token.as_str())
                .body(body.clone())
                .send()
                .await;

            let retryable = match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if status == StatusCode::UNAUTHORIZED {
                        // Tokens are per run; a rejected one ends the run's paging.
                        *self.token.lock().await = None;
                        return Err(anyhow!("igdb rejected the access token: {}", text));
                    }
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(anyhow!("igdb request failed (status={}): {}", status, text));
                    }
                    anyhow!("igdb request failed (status={}): {}", status, text)
                }
                Err(err) => anyhow::Error::new(err).context("igdb request error"),
            };

            if attempt >= self.cfg.max_retries {
                return Err(retryable.context(format!("giving up after {} retries", attempt)));
            }
            let wait = self.cfg.backoff_ms * ((attempt + 1) as u64);
            warn!(target = "igdb", attempt, wait_ms = wait, error = %retryable, "retrying igdb request");
            tokio::time::sleep(Duration::from_millis(wait)).await;
            attempt += 1;
        }
    }
}

#[async_trait::async_trait]
impl CatalogSource for IgdbService {
    fn name(&self) -> &'static str {
        "igdb"
    }

    fn max_page_size(&self) -> usize {
        IGDB_MAX_LIMIT
    }

    async fn acquire_token(&self) -> Result<AccessToken> {
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(AccessToken::new(token.access_token.clone()));
                }
            }
        }
        let token = self.request_new_token().await?;
        info!(target = "igdb", "obtained IGDB access token");
        let access = AccessToken::new(token.access_token.clone());
        *self.token.lock().await = Some(token);
        Ok(access)
    }

    #[instrument(skip(self, token), fields(source = "igdb"))]
    async fn fetch_page(
        &self,
        token: &AccessToken,
        mode: ImportMode,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GameRecord>> {
        let body = build_games_query(mode, limit, offset, Utc::now(), self.cfg.min_rating_count);
        debug!(target = "igdb", %body, "fetching games page");
        let text = self.execute_games_request(token, body).await?;
        parse_games(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "id": 1942,
            "name": "The Witcher 3: Wild Hunt",
            "summary": "Geralt's adventures",
            "first_release_date": 1431993600,
            "cover": {"id": 89386, "url": "//images.igdb.com/igdb/image/upload/t_thumb/co1wyy.jpg"},
            "genres": [{"id": 12, "name": "Role-playing (RPG)"}, {"id": 31, "name": "Adventure"}],
            "involved_companies": [
                {"id": 1, "company": {"id": 99, "name": "WB Games"}, "developer": false},
                {"id": 2, "company": {"id": 908, "name": "CD Projekt RED"}, "developer": true}
            ],
            "websites": [
                {"id": 5, "category": 1, "url": "https://thewitcher.com"},
                {"id": 6, "category": 13, "url": "https://store.steampowered.com/app/292030"}
            ]
        },
        {"id": 77},
        {"id": 78, "name": "  ", "websites": [{"type": 13, "url": "https://store.steampowered.com/app/400/Portal/"}],
         "involved_companies": [{"company": {"name": "Valve"}}]}
    ]"#;

    #[test]
    fn parses_full_record() {
        let records = parse_games(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);
        let witcher = &records[0];
        assert_eq!(witcher.igdb_id, Some(1942));
        assert_eq!(witcher.name, "The Witcher 3: Wild Hunt");
        assert_eq!(witcher.developer.as_deref(), Some("CD Projekt RED"));
        assert_eq!(witcher.genres, vec!["Role-playing (RPG)", "Adventure"]);
        assert_eq!(witcher.steam_app_id, Some(292030));
        assert_eq!(
            witcher.cover_url.as_deref(),
            Some("https://images.igdb.com/igdb/image/upload/t_1080p/co1wyy.jpg")
        );
        assert_eq!(witcher.release.unwrap().timestamp(), 1431993600);
    }

    #[test]
    fn missing_fields_fall_back() {
        let records = parse_games(SAMPLE).unwrap();
        let bare = &records[1];
        assert_eq!(bare.name, UNKNOWN_GAME_TITLE);
        assert!(bare.genres.is_empty());
        assert!(bare.developer.is_none());
        assert!(bare.cover_url.is_none());
        assert!(bare.release.is_none());
        assert!(bare.steam_app_id.is_none());

        let blank = &records[2];
        assert_eq!(blank.name, UNKNOWN_GAME_TITLE);
        assert_eq!(blank.steam_app_id, Some(400));
        assert_eq!(blank.developer.as_deref(), Some("Valve"));
    }

    #[test]
    fn wrongly_typed_field_only_loses_that_field() {
        let body = r#"[
            {"id": 1, "name": "Good", "first_release_date": 1431993600},
            {"id": 2, "name": "Bad", "first_release_date": "soon", "genres": [{"name": "Puzzle"}]},
            42
        ]"#;
        let records = parse_games(body).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].release.unwrap().timestamp(), 1431993600);

        let bad = &records[1];
        assert_eq!(bad.igdb_id, Some(2));
        assert_eq!(bad.name, "Bad");
        assert!(bad.release.is_none());
        assert_eq!(bad.genres, vec!["Puzzle"]);

        assert!(records[2].igdb_id.is_none());
        assert_eq!(records[2].name, UNKNOWN_GAME_TITLE);
    }

    #[test]
    fn rejects_non_array_payload() {
        assert!(parse_games(r#"{"message":"Authorization Failure"}"#).is_err());
    }

    #[test]
    fn query_shapes_per_mode() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let top = build_games_query(ImportMode::TopRated, 50, 100, now, 1000);
        assert!(top.contains("where rating_count > 1000;"));
        assert!(top.contains("sort rating desc;"));
        assert!(top.ends_with("limit 50; offset 100;"));

        let upcoming = build_games_query(ImportMode::Upcoming, 9999, 0, now, 1000);
        assert!(upcoming.contains("where first_release_date > 1700000000;"));
        assert!(upcoming.contains("limit 500; offset 0;"));
    }

    #[test]
    fn cover_urls_are_normalized() {
        assert_eq!(
            normalize_cover_url("https://x/t_thumb/a.jpg"),
            "https://x/t_1080p/a.jpg"
        );
        assert_eq!(normalize_cover_url("//x/a.jpg"), "https://x/a.jpg");
    }

    #[tokio::test]
    async fn token_requires_credentials() {
        let svc = IgdbService::new(IgdbServiceConfig::default()).unwrap();
        let err = svc.acquire_token().await.unwrap_err();
        assert!(err.to_string().contains("TWITCH_CLIENT_ID"));
    }
}
