use crate::config::Settings;
use crate::domain::Article;
use crate::news::{read_json, FetchWindow, NewsProvider, ProviderError};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://newsapi.org";
const PAGE_SIZE: u32 = 50;
const PROVIDER: &str = "newsapi";

/// Primary news source: NewsAPI `/v2/everything`.
#[derive(Debug, Clone)]
pub struct NewsApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    #[serde(default)]
    source: Option<NewsApiSource>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    #[serde(default)]
    name: Option<String>,
}

impl NewsApiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build newsapi http client")?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &Settings, timeout: Duration) -> Result<Self> {
        let mut client = Self::new(settings.require_newsapi_key()?, timeout)?;
        if let Ok(base) = std::env::var("NEWSAPI_BASE_URL") {
            if !base.trim().is_empty() {
                client.base_url = base;
            }
        }
        Ok(client)
    }

    fn url(&self) -> String {
        format!("{}/v2/everything", self.base_url.trim_end_matches('/'))
    }
}

fn search_query(ticker: &str) -> String {
    format!("({ticker}) AND (earnings OR stock OR market OR financial)")
}

fn normalize(ticker: &str, items: Vec<NewsApiArticle>) -> Vec<Article> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(published_at) = item
            .published_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            tracing::warn!(
                provider = PROVIDER,
                ticker,
                url = item.url.as_deref().unwrap_or_default(),
                "dropping article without a parseable publishedAt"
            );
            continue;
        };

        let body = item
            .content
            .filter(|c| !c.is_empty())
            .or(item.description)
            .unwrap_or_default();

        out.push(Article {
            id: None,
            ticker: ticker.to_string(),
            headline: item.title.unwrap_or_default(),
            body,
            source: item
                .source
                .and_then(|s| s.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            url: item.url.unwrap_or_default(),
            published_at,
        });
    }
    out
}

#[async_trait::async_trait]
impl NewsProvider for NewsApiClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(
        &self,
        ticker: &str,
        window: &FetchWindow,
    ) -> Result<Vec<Article>, ProviderError> {
        let res = self
            .http
            .get(self.url())
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", search_query(ticker)),
                ("language", "en".to_string()),
                ("sortBy", "publishedAt".to_string()),
                ("pageSize", PAGE_SIZE.to_string()),
                ("from", window.from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("to", window.to.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::transport(PROVIDER, e))?;

        let parsed: EverythingResponse = read_json(PROVIDER, res).await?;
        Ok(normalize(ticker, parsed.articles))
    }
}
