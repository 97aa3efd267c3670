use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, Client};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, instrument};

use super::{
    auth::{Credentials, Scope, TokenProvider},
    ApiError, PaginationCursor, PlayEvent, StreamingApi, TimeRange, TrackRef,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [StreamingApi] backed by the Spotify Web API.
pub struct SpotifyClient {
    http: Client,
    api_base: String,
    tokens: TokenProvider,
}

impl SpotifyClient {
    /// Builds the client once at start-up. Fails if no usable token is cached for `scope`.
    pub async fn connect(
        credentials: Credentials,
        scope: Scope,
        token_cache: PathBuf,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let tokens = TokenProvider::load(http.clone(), credentials, &scope, token_cache).await?;
        Ok(Self {
            http,
            api_base: API_BASE.into(),
            tokens,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, retry_after, message));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlayHistoryObject {
    track: Option<TrackObject>,
    played_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: String,
}

impl From<TrackObject> for TrackRef {
    fn from(TrackObject { id, name }: TrackObject) -> Self {
        TrackRef {
            id: id.map(Into::into),
            name: name.into(),
        }
    }
}

impl From<PlayHistoryObject> for PlayEvent {
    fn from(PlayHistoryObject { track, played_at }: PlayHistoryObject) -> Self {
        PlayEvent {
            played_at,
            track: track.map(Into::into),
        }
    }
}

#[async_trait]
impl StreamingApi for SpotifyClient {
    #[instrument(skip(self))]
    async fn recently_played(
        &self,
        limit: u32,
        before: Option<PaginationCursor>,
    ) -> Result<Vec<PlayEvent>, ApiError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.as_millis().to_string()));
        }
        let page: Paging<PlayHistoryObject> = self.get("/me/player/recently-played", &query).await?;
        debug!("Received {} play history items", page.items.len());
        Ok(page.items.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn top_tracks(
        &self,
        time_range: TimeRange,
        limit: u32,
    ) -> Result<Vec<TrackRef>, ApiError> {
        let query = [
            ("limit", limit.to_string()),
            ("time_range", time_range.as_str().to_string()),
        ];
        let page: Paging<TrackObject> = self.get("/me/top/tracks", &query).await?;
        debug!("Received {} top tracks", page.items.len());
        Ok(page.items.into_iter().map(Into::into).collect())
    }
}
