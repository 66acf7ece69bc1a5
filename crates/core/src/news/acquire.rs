use crate::config::NewsConfig;
use crate::domain::article::truncate_chars;
use crate::domain::Article;
use crate::news::dedup::merge_fallback;
use crate::news::{FetchWindow, NewsProvider, ProviderError};
use std::sync::Arc;
use std::time::Instant;

/// Per-ticker news acquisition: primary provider first, secondary merged in
/// when the primary comes back with fewer than `fallback_threshold` articles.
#[derive(Clone)]
pub struct NewsFetcher {
    primary: Arc<dyn NewsProvider>,
    secondary: Option<Arc<dyn NewsProvider>>,
    cfg: NewsConfig,
}

impl NewsFetcher {
    pub fn new(
        primary: Arc<dyn NewsProvider>,
        secondary: Option<Arc<dyn NewsProvider>>,
        cfg: NewsConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            cfg,
        }
    }

    pub fn config(&self) -> &NewsConfig {
        &self.cfg
    }

    /// Never fails: provider errors and timeouts leave that provider's
    /// contribution empty.
    pub async fn fetch_articles(&self, ticker: &str, window: &FetchWindow) -> Vec<Article> {
        let primary = self.fetch_from(self.primary.as_ref(), ticker, window).await;
        if primary.len() >= self.cfg.fallback_threshold {
            return primary;
        }

        let Some(secondary) = self.secondary.as_ref() else {
            tracing::debug!(ticker, found = primary.len(), "no secondary provider configured");
            return primary;
        };

        tracing::info!(
            ticker,
            found = primary.len(),
            threshold = self.cfg.fallback_threshold,
            secondary = secondary.name(),
            "primary provider returned too few articles; querying secondary"
        );
        let extra = self.fetch_from(secondary.as_ref(), ticker, window).await;
        let merged = merge_fallback(primary, extra);
        tracing::info!(ticker, total = merged.len(), "articles after fallback merge");
        merged
    }

    async fn fetch_from(
        &self,
        provider: &dyn NewsProvider,
        ticker: &str,
        window: &FetchWindow,
    ) -> Vec<Article> {
        let started = Instant::now();
        let name = provider.name();
        let raw = match tokio::time::timeout(self.cfg.fetch_timeout, provider.fetch(ticker, window))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                log_provider_error(ticker, &err);
                return Vec::new();
            }
            Err(_) => {
                tracing::error!(
                    provider = name,
                    ticker,
                    timeout = ?self.cfg.fetch_timeout,
                    "news fetch timed out"
                );
                return Vec::new();
            }
        };

        let received = raw.len();
        let kept = qualify(name, ticker, raw, window, &self.cfg);
        if received == 0 {
            tracing::info!(provider = name, ticker, "provider returned no articles");
        }
        tracing::info!(
            provider = name,
            ticker,
            received,
            kept = kept.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched articles"
        );
        kept
    }
}

fn log_provider_error(ticker: &str, err: &ProviderError) {
    match err {
        ProviderError::RateLimited { provider } => {
            tracing::warn!(provider, ticker, kind = err.kind(), "news provider rate limited");
        }
        ProviderError::Unauthorized { provider, status } => {
            tracing::error!(
                provider,
                ticker,
                status,
                kind = err.kind(),
                "news provider rejected credentials"
            );
        }
        _ => {
            tracing::error!(ticker, kind = err.kind(), error = %err, "news fetch failed");
        }
    }
}

/// Applies the article filters to one provider's result: drops articles from
/// before the window and those below the minimum length, truncates long
/// bodies and keeps at most `max_articles_per_ticker`.
pub fn qualify(
    provider: &str,
    ticker: &str,
    raw: Vec<Article>,
    window: &FetchWindow,
    cfg: &NewsConfig,
) -> Vec<Article> {
    let mut out = Vec::with_capacity(raw.len());
    for mut article in raw {
        if !window.contains(article.published_at) {
            tracing::debug!(
                provider,
                ticker,
                url = %article.url,
                published_at = %article.published_at,
                "dropping article from before the fetch window"
            );
            continue;
        }
        let len = article.body.chars().count();
        if len < cfg.min_article_length {
            tracing::debug!(
                provider,
                ticker,
                url = %article.url,
                len,
                "dropping article below minimum length"
            );
            continue;
        }
        if len > cfg.max_content_chars {
            article.body = truncate_chars(&article.body, cfg.max_content_chars).to_string();
        }
        out.push(article);
    }
    cap_articles(provider, ticker, &mut out, cfg.max_articles_per_ticker);
    out
}

/// Keeps the first `max` articles and returns the urls of the rest.
fn cap_articles(provider: &str, ticker: &str, kept: &mut Vec<Article>, max: usize) -> Vec<String> {
    if kept.len() <= max {
        return Vec::new();
    }
    let dropped: Vec<String> = kept.split_off(max).into_iter().map(|a| a.url).collect();
    for url in &dropped {
        tracing::debug!(provider, ticker, %url, "dropping article over the per-ticker cap");
    }
    tracing::info!(provider, ticker, max, dropped = dropped.len(), "per-ticker article cap reached");
    dropped
}
