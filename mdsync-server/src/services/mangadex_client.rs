//! MangaDex API client
//!
//! Implements [`RemoteClient`] over the MangaDex REST API:
//! - OAuth password grant, refreshed shortly before the 15 minute expiry
//! - Paged retrieval of the user's followed titles
//! - Title search and follow
//!
//! All requests share one rate limiter (5 req/s by default) so concurrent
//! sessions cannot exceed the remote policy.

use crate::reconcile::{match_search_results, CatalogRecord, ImportEntry, LocalizedTitles};
use crate::services::remote_client::{
    Credentials, RemoteClient, RemoteError, SearchOutcome,
};
use crate::services::session_manager::ClientFactory;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use mdsync_common::config::RemoteConfig;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lifetime assumed for a freshly issued access token
const TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);
/// Refresh when less than this remains
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Page size for followed-title retrieval (API maximum)
const FOLLOWS_PAGE_LIMIT: usize = 100;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Standard response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    result: String,
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: Option<String>,
}

impl ErrorDetail {
    fn message(&self) -> String {
        match &self.detail {
            Some(detail) if !detail.is_empty() => format!("{}: {}", self.title, detail),
            _ => self.title.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    #[serde(default, deserialize_with = "localized_or_empty")]
    title: LocalizedTitles,
    #[serde(default, rename = "altTitles")]
    alt_titles: Vec<LocalizedTitles>,
}

/// Empty language maps are sometimes serialized as `[]`
fn localized_or_empty<'de, D>(deserializer: D) -> Result<LocalizedTitles, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MapOrList {
        Map(LocalizedTitles),
        List(Vec<serde_json::Value>),
    }

    Ok(match MapOrList::deserialize(deserializer)? {
        MapOrList::Map(map) => map,
        MapOrList::List(_) => LocalizedTitles::new(),
    })
}

impl From<MangaData> for CatalogRecord {
    fn from(manga: MangaData) -> Self {
        CatalogRecord {
            id: manga.id,
            title: manga.attributes.title,
            alt_titles: manga.attributes.alt_titles,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

struct AuthState {
    credentials: Credentials,
    access_token: String,
    refresh_token: String,
    expires_at: Instant,
}

/// Query parameters for manga list endpoints
///
/// Each field maps to exactly one parameter name in [`SearchQuery::to_query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub title: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// `(field, direction)` pairs rendered as `order[field]=direction`
    pub order: Vec<(String, String)>,
}

impl SearchQuery {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(title) = &self.title {
            params.push(("title".to_string(), title.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        for (field, direction) in &self.order {
            params.push((format!("order[{}]", field), direction.clone()));
        }
        params
    }
}

/// Check status and decode a response envelope
fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<Envelope<T>, RemoteError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(RemoteError::Auth(format!("HTTP {}", status.as_u16())));
        }
        StatusCode::NOT_FOUND => return Err(RemoteError::NotFound(truncate(body))),
        StatusCode::TOO_MANY_REQUESTS => return Err(RemoteError::RateLimited),
        _ => {}
    }

    let envelope: Envelope<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: truncate(body),
            });
        }
        Err(e) => return Err(RemoteError::Decode(e.to_string())),
    };

    if !status.is_success() || envelope.result == "error" {
        let (code, message) = envelope
            .errors
            .first()
            .map(|e| (e.status, e.message()))
            .unwrap_or((status.as_u16(), "result=error with no details".to_string()));
        if code == StatusCode::NOT_FOUND.as_u16() {
            return Err(RemoteError::NotFound(message));
        }
        return Err(RemoteError::Api {
            status: if code == 0 { status.as_u16() } else { code },
            message,
        });
    }

    Ok(envelope)
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}...", &body[..i]),
        None => body.to_string(),
    }
}

/// MangaDex [`RemoteClient`]
pub struct MangaDexClient {
    http: Client,
    config: RemoteConfig,
    user_agent: String,
    rate_limiter: Arc<DirectLimiter>,
    auth: Mutex<Option<AuthState>>,
}

impl MangaDexClient {
    pub fn new(http: Client, config: RemoteConfig, rate_limiter: Arc<DirectLimiter>) -> Self {
        Self {
            http,
            config,
            user_agent: format!("mdsync/{}", env!("CARGO_PKG_VERSION")),
            rate_limiter,
            auth: Mutex::new(None),
        }
    }

    /// Factory producing one client per session over a shared HTTP pool and limiter
    pub fn factory(config: &RemoteConfig) -> Result<ClientFactory, RemoteError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));
        let config = config.clone();

        Ok(Arc::new(move || {
            Arc::new(MangaDexClient::new(
                http.clone(),
                config.clone(),
                rate_limiter.clone(),
            )) as Arc<dyn RemoteClient>
        }))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, RemoteError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http
            .post(&self.config.auth_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RemoteError::Auth(truncate(&body))
                }
                StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
                _ => RemoteError::Api {
                    status: status.as_u16(),
                    message: truncate(&body),
                },
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Current access token, refreshed if close to expiry
    async fn access_token(&self) -> Result<String, RemoteError> {
        let mut guard = self.auth.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| RemoteError::Auth("Not authenticated".to_string()))?;

        if state.expires_at.saturating_duration_since(Instant::now()) < REFRESH_MARGIN {
            debug!("Refreshing MangaDex access token");
            let refreshed = self
                .token_request(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", &state.refresh_token),
                    ("client_id", &state.credentials.client_id),
                    ("client_secret", &state.credentials.client_secret),
                ])
                .await?;
            if !refreshed.access_token.is_empty() {
                state.access_token = refreshed.access_token;
            }
            if !refreshed.refresh_token.is_empty() {
                state.refresh_token = refreshed.refresh_token;
            }
            state.expires_at = Instant::now() + TOKEN_LIFETIME;
        }

        Ok(state.access_token.clone())
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Envelope<T>, RemoteError> {
        let token = self.access_token().await?;
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.api_base_url, path);
        debug!(%method, %url, "MangaDex request");

        let response = self
            .http
            .request(method, &url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }

    async fn search(&self, entry: &ImportEntry) -> Result<Vec<CatalogRecord>, RemoteError> {
        let query = SearchQuery {
            title: Some(entry.normalized.clone()),
            limit: Some(self.config.search_limit),
            order: vec![("relevance".to_string(), "desc".to_string())],
            ..Default::default()
        };

        match self
            .request::<Vec<MangaData>>(Method::GET, "/manga", &query.to_query())
            .await
        {
            Ok(envelope) => Ok(envelope
                .data
                .unwrap_or_default()
                .into_iter()
                .map(CatalogRecord::from)
                .collect()),
            Err(RemoteError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn follow(&self, record_id: &str) -> Result<(), RemoteError> {
        let path = format!("/manga/{}/follow", record_id);
        self.request::<serde_json::Value>(Method::POST, &path, &[])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RemoteClient for MangaDexClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let token = self
            .token_request(&[
                ("grant_type", "password"),
                ("username", &credentials.username),
                ("password", &credentials.password),
                ("client_id", &credentials.client_id),
                ("client_secret", &credentials.client_secret),
            ])
            .await?;

        *self.auth.lock().await = Some(AuthState {
            credentials: credentials.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Instant::now() + TOKEN_LIFETIME,
        });
        info!(username = %credentials.username, "Authenticated with MangaDex");
        Ok(())
    }

    async fn fetch_all_followed(&self) -> Result<Vec<CatalogRecord>, RemoteError> {
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let query = SearchQuery {
                limit: Some(FOLLOWS_PAGE_LIMIT),
                offset: Some(offset),
                ..Default::default()
            };
            let envelope = self
                .request::<Vec<MangaData>>(Method::GET, "/user/follows/manga", &query.to_query())
                .await?;

            let total = envelope.total;
            let page = envelope.data.unwrap_or_default();
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            offset += page_len;
            records.extend(page.into_iter().map(CatalogRecord::from));
            debug!(fetched = records.len(), ?total, "Fetched followed page");

            match total {
                Some(total) if records.len() >= total => break,
                None if page_len < FOLLOWS_PAGE_LIMIT => break,
                _ => {}
            }
        }

        Ok(records)
    }

    async fn search_and_follow(
        &self,
        entries: &[ImportEntry],
        follow: bool,
    ) -> Result<SearchOutcome, RemoteError> {
        let mut outcome = SearchOutcome::default();

        for entry in entries {
            if entry.normalized.is_empty() {
                outcome.still_unmatched.push(entry.clone());
                continue;
            }

            let results = self.search(entry).await?;
            let Some((record, info)) = match_search_results(entry, &results) else {
                outcome.still_unmatched.push(entry.clone());
                continue;
            };

            if follow {
                self.follow(&record.id).await?;
            }
            debug!(
                import = %entry.original,
                remote = %info.remote_title,
                match_type = ?info.match_type,
                follow,
                "Search matched"
            );
            outcome.new_matches.push((record.id.clone(), info));
        }

        Ok(outcome)
    }
}
