//! Contract with the streaming service. [StreamingApi] is what the aggregators consume;
//! [spotify::SpotifyClient] is the production implementation and [auth] supplies its tokens.

pub mod auth;
pub mod spotify;

use std::{fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use reqwest::StatusCode;

/// Identity of a played track. Archives only carry the name, the API also provides an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub id: Option<Arc<str>>,
    pub name: Arc<str>,
}

impl TrackRef {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

/// One record of something being played. `track` is `None` for podcasts, deleted tracks and
/// other non-track audio; such events never contribute to counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayEvent {
    pub played_at: DateTime<Utc>,
    pub track: Option<TrackRef>,
}

impl PlayEvent {
    pub fn is_track(&self) -> bool {
        self.track.is_some()
    }
}

/// "Fetch older than" bound for recently played pagination, in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor(i64);

impl PaginationCursor {
    /// Cursor that excludes `instant` itself and everything after it.
    pub fn before(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp_millis() - 1)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn instant(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Period covered by a top tracks list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimeRange {
    #[value(name = "short_term")]
    ShortTerm,
    #[value(name = "medium_term")]
    MediumTerm,
    #[value(name = "long_term")]
    LongTerm,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }

    /// Rough number of days the service aggregates over for this range.
    pub fn period_days(&self) -> u32 {
        match self {
            TimeRange::ShortTerm => 28,
            TimeRange::MediumTerm => 180,
            TimeRange::LongTerm => 365,
        }
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("rate limited by the service")]
    RateLimited { retry_after: Option<Duration> },
    #[error("service responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after },
            status => ApiError::Status { status, message },
        }
    }

    /// Whether trying the same request again later can succeed. Authorization problems and
    /// client errors won't go away by waiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::RateLimited { .. } | ApiError::Decode(_) => true,
            ApiError::Unauthorized(_) => false,
            ApiError::Status { status, .. } => status.is_server_error(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Intended to serve as a contract the streaming service client must implement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamingApi: Send + Sync {
    /// Most recent plays older than `before`, newest first, at most `limit` of them.
    async fn recently_played(
        &self,
        limit: u32,
        before: Option<PaginationCursor>,
    ) -> Result<Vec<PlayEvent>, ApiError>;

    /// Tracks ranked by how much they were played during `time_range`, best first.
    async fn top_tracks(&self, time_range: TimeRange, limit: u32)
        -> Result<Vec<TrackRef>, ApiError>;
}
