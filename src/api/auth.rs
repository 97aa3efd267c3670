//! Credentials and access tokens for the streaming service.
//!
//! Obtaining the very first token requires the interactive authorization code flow, which is
//! not handled here. Tokens are read from a cache file compatible with spotipy's
//! `.spotifycache`, refreshed when expired and written back.

use std::{
    collections::BTreeSet,
    env,
    fmt::Display,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fs4::tokio::AsyncFileExt;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, info, instrument, warn};

use super::ApiError;

pub const CLIENT_ID_VAR: &str = "SPOTIPY_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "SPOTIPY_CLIENT_SECRET";
pub const REDIRECT_URI_VAR: &str = "SPOTIPY_REDIRECT_URI";

pub const DEFAULT_TOKEN_CACHE: &str = ".spotifycache";

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Tokens are refreshed this many seconds before they actually expire.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Reads credentials from the process environment. A `.env` file should be loaded
    /// beforehand if one is used.
    pub fn from_env() -> Result<Self> {
        fn var(name: &str) -> Result<String> {
            env::var(name).with_context(|| format!("Environment variable {name} is not set"))
        }

        Ok(Self {
            client_id: var(CLIENT_ID_VAR)?,
            client_secret: var(CLIENT_SECRET_VAR)?,
            redirect_uri: var(REDIRECT_URI_VAR)?,
        })
    }

    /// Address a user has to visit to grant `scope` to this application.
    pub fn authorize_url(&self, scope: &Scope) -> Result<Url> {
        let scope = scope.to_string();
        Ok(Url::parse_with_params(
            &format!("{ACCOUNTS_BASE}/authorize"),
            [
                ("client_id", self.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", scope.as_str()),
            ],
        )?)
    }
}

/// Set of permissions requested from the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope(BTreeSet<String>);

impl Scope {
    pub const RECENTLY_PLAYED: &'static str = "user-read-recently-played";
    pub const TOP_READ: &'static str = "user-top-read";

    /// Parses a space separated scope string.
    pub fn parse(value: &str) -> Self {
        Self(value.split_whitespace().map(str::to_string).collect())
    }

    pub fn with(mut self, permission: &str) -> Self {
        self.0.insert(permission.to_string());
        self
    }

    pub fn covers(&self, other: &Scope) -> bool {
        other.0.is_subset(&self.0)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self.0.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        write!(f, "{joined}")
    }
}

/// The cached token. Field names follow spotipy's cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    /// Seconds since epoch.
    pub expires_at: i64,
    pub refresh_token: Option<String>,
}

fn bearer() -> String {
    "Bearer".into()
}

impl TokenInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now.timestamp() < EXPIRY_MARGIN_SECONDS
    }

    pub fn scope(&self) -> Scope {
        Scope::parse(&self.scope)
    }

    fn refreshed(&self, response: RefreshResponse, now: DateTime<Utc>) -> Self {
        TokenInfo {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(bearer),
            expires_in: response.expires_in,
            scope: response.scope.unwrap_or_else(|| self.scope.clone()),
            expires_at: now.timestamp() + response.expires_in,
            // The service may omit the refresh token, in which case the old one stays valid.
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: i64,
    scope: Option<String>,
    refresh_token: Option<String>,
}

pub async fn read_token_cache(path: &Path) -> Result<Option<TokenInfo>> {
    async fn read(path: &Path) -> std::result::Result<String, std::io::Error> {
        let mut file = File::open(path).await?;
        file.lock_shared()?;
        let mut content = String::new();
        let result = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        result.map(|_| content)
    }

    match read(path).await {
        Ok(content) => Ok(Some(serde_json::from_str(&content).with_context(|| {
            format!("Token cache {path:?} is not a valid token file")
        })?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read token cache {path:?}")),
    }
}

pub async fn write_token_cache(path: &Path, token: &TokenInfo) -> Result<()> {
    let content = serde_json::to_vec(token)?;
    let mut file = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .with_context(|| format!("Failed to open token cache {path:?}"))?;

    // Truncate only once the lock is held so concurrent readers never see a partial file.
    file.lock_exclusive()?;
    let result = async {
        file.set_len(0).await?;
        file.write_all(&content).await?;
        file.flush().await
    }
    .await;
    file.unlock_async().await?;
    Ok(result?)
}

/// Hands out valid access tokens, refreshing and persisting them as needed.
pub struct TokenProvider {
    http: Client,
    credentials: Credentials,
    cache_path: PathBuf,
    accounts_base: String,
    token: Mutex<TokenInfo>,
}

impl TokenProvider {
    /// Loads the cached token and checks that it was granted everything in `scope`.
    #[instrument(skip(http))]
    pub async fn load(
        http: Client,
        credentials: Credentials,
        scope: &Scope,
        cache_path: PathBuf,
    ) -> Result<Self> {
        let Some(token) = read_token_cache(&cache_path).await? else {
            bail!(
                "No cached token found at {cache_path:?}. Authorize the application at {} and \
                 store the resulting token there",
                credentials.authorize_url(scope)?
            );
        };

        if !token.scope().covers(scope) {
            bail!(
                "Cached token grants \"{}\" but \"{scope}\" is required. Authorize again at {}",
                token.scope,
                credentials.authorize_url(scope)?
            );
        }
        debug!("Loaded token expiring at {}", token.expires_at);

        Ok(Self::new(http, credentials, cache_path, token))
    }

    pub(crate) fn new(
        http: Client,
        credentials: Credentials,
        cache_path: PathBuf,
        token: TokenInfo,
    ) -> Self {
        Self {
            http,
            credentials,
            cache_path,
            accounts_base: ACCOUNTS_BASE.into(),
            token: Mutex::new(token),
        }
    }

    pub async fn access_token(&self) -> Result<String, ApiError> {
        let mut token = self.token.lock().await;
        let now = Utc::now();
        if token.is_expired(now) {
            let refreshed = self.refresh(&token, now).await?;
            *token = refreshed;
        }
        Ok(token.access_token.clone())
    }

    async fn refresh(&self, token: &TokenInfo, now: DateTime<Utc>) -> Result<TokenInfo, ApiError> {
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(ApiError::Unauthorized(
                "access token expired and no refresh token is cached".into(),
            ));
        };

        info!("Refreshing access token");
        let response = self
            .http
            .post(format!("{}/api/token", self.accounts_base))
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_client_error() {
            // invalid_grant and friends mean the user has to authorize again
            return Err(ApiError::Unauthorized(format!(
                "token refresh rejected with {status}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(ApiError::from_status(status, None, body));
        }

        let refreshed = token.refreshed(serde_json::from_str(&body)?, now);
        if let Err(e) = write_token_cache(&self.cache_path, &refreshed).await {
            warn!("Failed to persist refreshed token {e:?}");
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use reqwest::{Client, StatusCode};
    use tempfile::tempdir;

    use super::{
        read_token_cache, write_token_cache, Credentials, RefreshResponse, Scope, TokenInfo,
        TokenProvider,
    };
    use crate::api::{test_server::serve_once, ApiError};

    fn token(expires_at: i64, scope: &str) -> TokenInfo {
        TokenInfo {
            access_token: "access".into(),
            token_type: "Bearer".into(),
            expires_in: 3600,
            scope: scope.into(),
            expires_at,
            refresh_token: Some("refresh".into()),
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://127.0.0.1:8888/callback".into(),
        }
    }

    fn provider(accounts_base: String, cache_path: PathBuf, token: TokenInfo) -> TokenProvider {
        let mut provider = TokenProvider::new(Client::new(), credentials(), cache_path, token);
        provider.accounts_base = accounts_base;
        provider
    }

    #[test]
    fn scope_covering() {
        let granted = Scope::parse("user-read-recently-played user-top-read");
        let live = Scope::default().with(Scope::RECENTLY_PLAYED);
        let both = live.clone().with(Scope::TOP_READ);

        assert!(granted.covers(&live));
        assert!(granted.covers(&both));
        assert!(!live.covers(&both));
        assert_eq!(both.to_string(), "user-read-recently-played user-top-read");
    }

    #[test]
    fn expiry_uses_margin() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        assert!(!token(now.timestamp() + 120, "").is_expired(now));
        assert!(token(now.timestamp() + 30, "").is_expired(now));
        assert!(token(now.timestamp() - 1, "").is_expired(now));
    }

    #[test]
    fn refresh_keeps_previous_refresh_token() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let previous = token(0, "user-read-recently-played");
        let refreshed = previous.refreshed(
            RefreshResponse {
                access_token: "new".into(),
                token_type: None,
                expires_in: 3600,
                scope: None,
                refresh_token: None,
            },
            now,
        );

        assert_eq!(refreshed.access_token, "new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(refreshed.scope, "user-read-recently-played");
        assert_eq!(refreshed.expires_at, now.timestamp() + 3600);
    }

    #[test]
    fn reads_spotipy_cache_format() -> Result<()> {
        let cached = r#"{"access_token": "abc", "token_type": "Bearer", "expires_in": 3600,
            "scope": "user-read-recently-played", "expires_at": 1709640000,
            "refresh_token": "def"}"#;
        let token: TokenInfo = serde_json::from_str(cached)?;
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_at, 1709640000);
        assert_eq!(token.refresh_token.as_deref(), Some("def"));
        Ok(())
    }

    #[tokio::test]
    async fn cache_roundtrip_overwrites_longer_content() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".spotifycache");

        assert_eq!(read_token_cache(&path).await?, None);

        let mut long = token(10, "user-read-recently-played user-top-read");
        long.access_token = "x".repeat(512);
        write_token_cache(&path, &long).await?;

        let short = token(20, "user-top-read");
        write_token_cache(&path, &short).await?;

        assert_eq!(read_token_cache(&path).await?, Some(short));
        Ok(())
    }

    #[tokio::test]
    async fn provider_requires_cache_and_scope() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".spotifycache");
        let scope = Scope::default()
            .with(Scope::RECENTLY_PLAYED)
            .with(Scope::TOP_READ);

        let missing = TokenProvider::load(Client::new(), credentials(), &scope, path.clone()).await;
        assert!(missing.is_err());

        write_token_cache(&path, &token(i64::MAX / 2, "user-read-recently-played")).await?;
        let narrow = TokenProvider::load(Client::new(), credentials(), &scope, path.clone()).await;
        assert!(narrow.is_err());

        write_token_cache(
            &path,
            &token(i64::MAX / 2, "user-read-recently-played user-top-read"),
        )
        .await?;
        let provider = TokenProvider::load(Client::new(), credentials(), &scope, path).await?;
        assert_eq!(provider.access_token().await?, "access");
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_cached() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".spotifycache");
        let expired = token(0, "user-read-recently-played");
        write_token_cache(&path, &expired).await?;

        let (base, request) = serve_once(
            "200 OK",
            &[],
            r#"{"access_token": "new", "token_type": "Bearer", "expires_in": 3600,
                "scope": "user-read-recently-played"}"#,
        )
        .await?;
        let provider = provider(base, path.clone(), expired);

        assert_eq!(provider.access_token().await?, "new");
        // Still valid, no second request
        assert_eq!(provider.access_token().await?, "new");

        let request = request.await??;
        assert!(request.starts_with("POST /api/token "), "{request}");
        assert!(request.contains("grant_type=refresh_token"));
        assert!(request.contains("refresh_token=refresh"));
        assert!(request.to_ascii_lowercase().contains("authorization: basic "));

        let cached = read_token_cache(&path).await?.unwrap();
        assert_eq!(cached.access_token, "new");
        assert_eq!(cached.refresh_token.as_deref(), Some("refresh"));
        assert!(cached.expires_at > Utc::now().timestamp());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_refresh_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".spotifycache");
        let expired = token(0, "user-read-recently-played");
        write_token_cache(&path, &expired).await?;

        let (base, _request) =
            serve_once("400 Bad Request", &[], r#"{"error": "invalid_grant"}"#).await?;
        let provider = provider(base, path.clone(), expired.clone());

        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)), "{err:?}");
        assert!(!err.is_retryable());
        assert_eq!(read_token_cache(&path).await?, Some(expired));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_server_error_is_retryable() -> Result<()> {
        let dir = tempdir()?;
        let (base, _request) = serve_once("503 Service Unavailable", &[], "{}").await?;
        let provider = provider(base, dir.path().join(".spotifycache"), token(0, ""));

        let err = provider.access_token().await.unwrap_err();
        assert!(
            matches!(err, ApiError::Status { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE),
            "{err:?}"
        );
        assert!(err.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_fatal() -> Result<()> {
        let dir = tempdir()?;
        let mut expired = token(0, "user-read-recently-played");
        expired.refresh_token = None;
        // Nothing listens here, the request must not be attempted
        let provider = provider(
            "http://127.0.0.1:9".into(),
            dir.path().join(".spotifycache"),
            expired,
        );

        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)), "{err:?}");
        assert!(!err.is_retryable());
        Ok(())
    }

    #[test]
    fn authorize_url_contains_scope() -> Result<()> {
        let url = credentials().authorize_url(&Scope::default().with(Scope::RECENTLY_PLAYED))?;
        let query = url.query_pairs().collect::<Vec<_>>();
        assert!(query
            .iter()
            .any(|(k, v)| k == "scope" && v == "user-read-recently-played"));
        assert!(query.iter().any(|(k, v)| k == "client_id" && v == "id"));
        Ok(())
    }
}
