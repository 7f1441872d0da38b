//! HTTP transport shared by every provider.
//!
//! Requests carry the credential held in a request-scoped [`TokenCache`]. When a
//! response looks like an expired OAuth token and a refresher is configured, the
//! refresher returns a new token state which is published to the cache before the
//! request is retried. Attempts are bounded by [`MAX_ATTEMPTS`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::VcsProviderConfig;
use crate::error::VcsError;
use crate::vcs::VcsType;

/// Upper bound on attempts for one logical call, including the first one.
pub const MAX_ATTEMPTS: usize = 3;

const AZURE_TOKEN_URL: &str = "https://app.vssps.visualstudio.com/oauth2/token";

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
            Credential::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

impl Credential {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }
}

/// The token value that a refresh replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenState {
    pub credential: Credential,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenState {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::Bearer(token.into()),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn access_token(&self) -> &str {
        match &self.credential {
            Credential::Bearer(token) => token,
            Credential::Basic { password, .. } => password,
        }
    }
}

/// Holds the current token for the lifetime of one webhook request.
#[derive(Debug)]
pub struct TokenCache {
    state: RwLock<TokenState>,
}

impl TokenCache {
    pub fn new(state: TokenState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn current(&self) -> TokenState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn publish(&self, next: TokenState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Provider specific OAuth refresh call.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, client: &Client, current: &TokenState) -> Result<TokenState, VcsError>;
}

/// Persists refreshed tokens so the next request starts from them.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load_token(&self, provider_id: &str) -> crate::error::Result<Option<TokenState>>;
    async fn save_token(&self, provider_id: &str, token: &TokenState) -> crate::error::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshStyle {
    /// client id and secret in the form body (GitHub, GitLab)
    FormSecret,
    /// client id and secret as basic auth (Bitbucket)
    BasicClient,
    /// JWT bearer assertion (Azure DevOps)
    Assertion,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// OAuth2 refresh-token grant against the provider's token endpoint.
pub struct OAuthRefresher {
    provider_id: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
    style: RefreshStyle,
    store: Option<Arc<dyn TokenStore>>,
}

impl OAuthRefresher {
    pub fn for_provider(
        config: &VcsProviderConfig,
        redirect_uri: Option<String>,
        store: Option<Arc<dyn TokenStore>>,
    ) -> Self {
        let instance = config.instance_url.trim_end_matches('/');
        let (token_url, style) = match config.vcs_type {
            VcsType::GitHub => (
                format!("{}/login/oauth/access_token", instance),
                RefreshStyle::FormSecret,
            ),
            VcsType::GitLab => (format!("{}/oauth/token", instance), RefreshStyle::FormSecret),
            VcsType::Bitbucket => {
                let host = if instance.contains("api.bitbucket.org") || instance.is_empty() {
                    "https://bitbucket.org"
                } else {
                    instance
                };
                (
                    format!("{}/site/oauth2/access_token", host),
                    RefreshStyle::BasicClient,
                )
            }
            VcsType::AzureDevOps => (AZURE_TOKEN_URL.to_string(), RefreshStyle::Assertion),
        };
        Self {
            provider_id: config.id.clone(),
            token_url,
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config
                .client_secret
                .as_ref()
                .map(|s| s.expose().to_string())
                .unwrap_or_default(),
            redirect_uri,
            style,
            store,
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, client: &Client, current: &TokenState) -> Result<TokenState, VcsError> {
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| VcsError::Refresh("no refresh token available".into()))?;

        let request = client
            .post(&self.token_url)
            .header("Accept", "application/json");
        let request = match self.style {
            RefreshStyle::FormSecret => request.form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ]),
            RefreshStyle::BasicClient => request
                .basic_auth(&self.client_id, Some(&self.client_secret))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                ]),
            RefreshStyle::Assertion => request.form(&[
                (
                    "client_assertion_type",
                    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer",
                ),
                ("client_assertion", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("assertion", refresh_token.as_str()),
                ("redirect_uri", self.redirect_uri.as_deref().unwrap_or_default()),
            ]),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(VcsError::Refresh(format!(
                "status code {}, body {:?}",
                status.as_u16(),
                body
            )));
        }
        let parsed: RefreshResponse = serde_json::from_str(&body)?;
        let access_token = match (parsed.access_token, parsed.error) {
            (Some(token), None) if !token.is_empty() => token,
            (_, error) => {
                return Err(VcsError::Refresh(format!(
                    "{}: {}",
                    error.unwrap_or_else(|| "empty access token".into()),
                    parsed.error_description.unwrap_or_default()
                )));
            }
        };

        let credential = match &current.credential {
            Credential::Basic { username, .. } => Credential::Basic {
                username: username.clone(),
                password: access_token,
            },
            Credential::Bearer(_) => Credential::Bearer(access_token),
        };
        let next = TokenState {
            credential,
            refresh_token: parsed.refresh_token.or(Some(refresh_token)),
            expires_at: parsed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save_token(&self.provider_id, &next).await {
                warn!(provider = %self.provider_id, "Failed to persist refreshed token: {}", e);
            }
        }
        Ok(next)
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Matches the RFC 6750 `invalid_token` error shape.
pub fn is_token_expired(status: u16, body: &str) -> bool {
    if status < 400 {
        return false;
    }
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => {
            parsed.error.as_deref() == Some("invalid_token")
                || parsed
                    .error_description
                    .is_some_and(|d| d.to_lowercase().contains("expired"))
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Maps 404 to `NotFound` and any other non-2xx status to a generic error.
    pub fn error_for_status(self, method: &Method, url: &str) -> Result<Self, VcsError> {
        if self.status == 404 {
            return Err(VcsError::NotFound(url.to_string()));
        }
        if self.status >= 300 {
            return Err(VcsError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: self.status,
                body: self.body,
            });
        }
        Ok(self)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, VcsError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[derive(Clone)]
pub struct Transport {
    client: Client,
    tokens: Arc<TokenCache>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl Transport {
    pub fn new(client: Client, token: TokenState) -> Self {
        Self {
            client,
            tokens: Arc::new(TokenCache::new(token)),
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn token(&self) -> TokenState {
        self.tokens.current()
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, VcsError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.tokens.current();
            let mut builder = token
                .credential
                .apply(self.client.request(method.clone(), url));
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let response_headers = response.headers().clone();
            let text = response.text().await?;

            if !is_token_expired(status, &text) {
                return Ok(HttpResponse {
                    status,
                    headers: response_headers,
                    body: text,
                });
            }

            let Some(refresher) = &self.refresher else {
                return Ok(HttpResponse {
                    status,
                    headers: response_headers,
                    body: text,
                });
            };
            if attempt >= MAX_ATTEMPTS {
                warn!(%method, url, attempt, "OAuth token still rejected, giving up");
                return Err(VcsError::RetryExhausted {
                    attempts: attempt,
                    status,
                    body: text,
                });
            }

            let next = refresher.refresh(&self.client, &token).await?;
            self.tokens.publish(next);
            debug!(%method, url, attempt, "OAuth token refreshed, retrying");
        }
    }

    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, VcsError> {
        self.request(Method::GET, url, None, headers).await?
            .error_for_status(&Method::GET, url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, VcsError> {
        self.get(url, &[]).await?.json()
    }

    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, VcsError> {
        self.request(method.clone(), url, Some(body), &[])
            .await?
            .error_for_status(&method, url)
    }

    /// DELETE where an already missing resource counts as deleted.
    pub async fn delete_idempotent(&self, url: &str) -> Result<(), VcsError> {
        let response = self.request(Method::DELETE, url, None, &[]).await?;
        if response.status == 404 {
            debug!(url, "Resource already gone");
            return Ok(());
        }
        response.error_for_status(&Method::DELETE, url)?;
        Ok(())
    }
}
