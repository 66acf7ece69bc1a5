use crate::domain::Article;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod acquire;
pub mod dedup;
pub mod finnhub;
pub mod newsapi;

pub use acquire::NewsFetcher;
pub use finnhub::FinnhubClient;
pub use newsapi::NewsApiClient;

/// Look-back interval for one fetch. Both ends are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FetchWindow {
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> Self {
        Self {
            from: now - Duration::hours(hours),
            to: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from
    }
}

/// Provider failures. Every variant degrades to an empty article list for the
/// ticker; the variant only decides how the failure is logged.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: rate limited (HTTP 429)")]
    RateLimited { provider: &'static str },

    #[error("{provider}: authentication rejected (HTTP {status})")]
    Unauthorized { provider: &'static str, status: u16 },

    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider}: request failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider}: unexpected response: {detail}")]
    Decode {
        provider: &'static str,
        detail: String,
    },
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Unauthorized { .. } => "unauthorized",
            ProviderError::Http { .. } => "http_status",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Transport { .. } => "transport",
            ProviderError::Decode { .. } => "decode",
        }
    }

    fn from_status(provider: &'static str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited { provider },
            code @ (401 | 403) => ProviderError::Unauthorized {
                provider,
                status: code,
            },
            code => ProviderError::Http {
                provider,
                status: code,
                body: crate::domain::article::truncate_chars(&body, 300).to_string(),
            },
        }
    }

    fn transport(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { provider }
        } else {
            ProviderError::Transport {
                provider,
                source: err,
            }
        }
    }
}

/// A news source queried per ticker. Implementations return every article
/// they could normalize; length, window and count filtering happen in
/// [`acquire`].
#[async_trait::async_trait]
pub trait NewsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, ticker: &str, window: &FetchWindow)
        -> Result<Vec<Article>, ProviderError>;
}

async fn read_json<T: DeserializeOwned>(
    provider: &'static str,
    res: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;
    if !status.is_success() {
        return Err(ProviderError::from_status(provider, status, text));
    }
    serde_json::from_str::<T>(&text).map_err(|e| ProviderError::Decode {
        provider,
        detail: e.to_string(),
    })
}
