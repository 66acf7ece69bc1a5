use crate::config::Settings;
use crate::domain::Article;
use crate::news::{read_json, FetchWindow, NewsProvider, ProviderError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://finnhub.io";
const PROVIDER: &str = "finnhub";

/// Secondary news source: Finnhub company news. Only queried when the primary
/// source comes back thin.
#[derive(Debug, Clone)]
pub struct FinnhubClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CompanyNewsItem {
    /// Unix seconds.
    #[serde(default)]
    datetime: i64,
    #[serde(default)]
    headline: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    url: String,
}

impl FinnhubClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build finnhub http client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &Settings, timeout: Duration) -> Result<Self> {
        let mut client = Self::new(settings.require_finnhub_key()?, timeout)?;
        if let Ok(base) = std::env::var("FINNHUB_BASE_URL") {
            if !base.trim().is_empty() {
                client.base_url = base;
            }
        }
        Ok(client)
    }

    fn url(&self) -> String {
        format!("{}/api/v1/company-news", self.base_url.trim_end_matches('/'))
    }
}

fn normalize(ticker: &str, items: Vec<CompanyNewsItem>) -> Vec<Article> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(published_at) = DateTime::<Utc>::from_timestamp(item.datetime, 0) else {
            tracing::warn!(
                provider = PROVIDER,
                ticker,
                url = %item.url,
                datetime = item.datetime,
                "dropping article with out-of-range timestamp"
            );
            continue;
        };
        let body = if item.summary.is_empty() {
            item.headline.clone()
        } else {
            item.summary
        };
        out.push(Article {
            id: None,
            ticker: ticker.to_string(),
            headline: item.headline,
            body,
            source: item.source.unwrap_or_else(|| "Unknown".to_string()),
            url: item.url,
            published_at,
        });
    }
    out
}

#[async_trait::async_trait]
impl NewsProvider for FinnhubClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<Article>, ProviderError> {
        // Finnhub filters by calendar day only; the window start is enforced
        // again after normalization.
        let res = self
            .http
            .get(self.url())
            .query(&[
                ("symbol", ticker.to_string()),
                ("from", window.from.format("%Y-%m-%d").to_string()),
                ("to", window.to.format("%Y-%m-%d").to_string()),
                ("token", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let items: Vec<CompanyNewsItem> = read_json(PROVIDER, res).await?;
        Ok(normalize(ticker, items))
    }
}
