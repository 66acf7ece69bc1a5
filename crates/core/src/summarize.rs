use crate::config::SummaryConfig;
use crate::domain::article::truncate_chars;
use crate::domain::{Article, Fingerprint, SentimentLabel, SentimentResult};
use crate::llm::{Summarizer, SummaryPrompt};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

const SYSTEM_PROMPT: &str = "You are a financial analyst. Write concise, factual summaries \
without describing your reasoning. Reply with the summary only.";

pub fn no_articles_placeholder(ticker: &str) -> String {
    format!("{ticker}: No articles available for summary.")
}

pub fn failure_placeholder(ticker: &str) -> String {
    format!("{ticker}: Unable to generate summary.")
}

/// Label distribution and mean confidence, as given to the model.
pub fn sentiment_summary(sentiments: &[&SentimentResult]) -> String {
    if sentiments.is_empty() {
        return "No sentiment data available.".to_string();
    }
    let count = |label: SentimentLabel| sentiments.iter().filter(|s| s.label == label).count();
    let avg_confidence =
        sentiments.iter().map(|s| s.confidence).sum::<f64>() / sentiments.len() as f64;
    format!(
        "Positive: {}, Neutral: {}, Negative: {}. Average confidence: {avg_confidence:.2}",
        count(SentimentLabel::Positive),
        count(SentimentLabel::Neutral),
        count(SentimentLabel::Negative),
    )
}

pub fn build_prompt(
    ticker: &str,
    articles: &[Article],
    sentiments: &[&SentimentResult],
    cfg: &SummaryConfig,
) -> SummaryPrompt {
    let mut listing = String::new();
    for (i, article) in articles.iter().take(cfg.max_articles).enumerate() {
        if i > 0 {
            listing.push_str("\n\n");
        }
        let body = if article.body.is_empty() {
            article.headline.as_str()
        } else {
            truncate_chars(&article.body, cfg.body_chars)
        };
        let _ = write!(
            listing,
            "Article {}:\nHeadline: {}\nSource: {}\nContent: {}",
            i + 1,
            article.headline,
            article.source,
            body
        );
    }

    let user = format!(
        "Summarize the following news about {ticker} in 2-3 sentences.\n\
Cover what happened and its impact on {ticker}, name the company, state whether \
sentiment is improving, declining or stable, and keep to the facts.\n\n\
Sentiment: {}\n\n\
Articles:\n{listing}\n\n\
Summary:",
        sentiment_summary(sentiments)
    );

    SummaryPrompt {
        ticker: ticker.to_string(),
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// Runs one summarization per ticker on a bounded pool. Failures and
/// timeouts become placeholder text for that ticker only.
#[derive(Clone)]
pub struct SummaryFanOut {
    summarizer: Arc<dyn Summarizer>,
    cfg: SummaryConfig,
}

impl SummaryFanOut {
    pub fn new(summarizer: Arc<dyn Summarizer>, cfg: SummaryConfig) -> Self {
        Self { summarizer, cfg }
    }

    pub async fn summarize_ticker(
        &self,
        ticker: &str,
        articles: &[Article],
        sentiments: &[&SentimentResult],
    ) -> String {
        if articles.is_empty() {
            tracing::info!(ticker, "no articles; skipping summary");
            return no_articles_placeholder(ticker);
        }

        let started = Instant::now();
        let prompt = build_prompt(ticker, articles, sentiments, &self.cfg);
        let provider = self.summarizer.provider().as_str();
        match tokio::time::timeout(self.cfg.timeout, self.summarizer.summarize(&prompt)).await {
            Ok(Ok(summary)) => {
                tracing::info!(
                    ticker,
                    provider,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generated summary"
                );
                summary
            }
            Ok(Err(err)) => {
                tracing::error!(ticker, provider, error = %format!("{err:#}"), "summary failed; using placeholder");
                failure_placeholder(ticker)
            }
            Err(_) => {
                tracing::error!(ticker, provider, timeout = ?self.cfg.timeout, "summary timed out; using placeholder");
                failure_placeholder(ticker)
            }
        }
    }

    /// Summaries keyed by ticker. Every ticker in `articles` gets an entry.
    pub async fn summarize_all(
        &self,
        articles: &BTreeMap<String, Vec<Article>>,
        sentiments: &HashMap<Fingerprint, SentimentResult>,
    ) -> BTreeMap<String, String> {
        let results: Vec<(String, String)> = stream::iter(articles.iter())
            .map(|(ticker, list)| async move {
                let scored: Vec<&SentimentResult> = list
                    .iter()
                    .filter_map(|a| sentiments.get(&a.fingerprint()))
                    .collect();
                let summary = self.summarize_ticker(ticker, list, &scored).await;
                (ticker.clone(), summary)
            })
            .buffer_unordered(self.cfg.concurrency.max(1))
            .collect()
            .await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::llm::Provider;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSummarizer {
        calls: AtomicUsize,
        fail_for: &'static str,
        hang_for: &'static str,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSummarizer {
        fn new(fail_for: &'static str, hang_for: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_for,
                hang_for,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Summarizer for FakeSummarizer {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn summarize(&self, prompt: &SummaryPrompt) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prompt.ticker == self.fail_for {
                anyhow::bail!("backend down");
            }
            if prompt.ticker == self.hang_for {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(format!("{} looks fine.", prompt.ticker))
        }
    }

    fn article(ticker: &str, n: usize) -> Article {
        Article {
            id: Some(n as i64),
            ticker: ticker.to_string(),
            headline: format!("{ticker} headline {n}"),
            body: "z".repeat(900),
            source: "Reuters".to_string(),
            url: format!("https://news.example/{ticker}/{n}"),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    fn result(label: SentimentLabel, confidence: f64) -> SentimentResult {
        SentimentResult {
            fingerprint: crate::domain::Fingerprint::of("h", "s"),
            article_id: None,
            label,
            confidence,
            score: 0.0,
            degraded: false,
        }
    }

    #[test]
    fn sentiment_summary_counts_labels() {
        let a = result(SentimentLabel::Positive, 0.9);
        let b = result(SentimentLabel::Negative, 0.7);
        let c = result(SentimentLabel::Positive, 0.8);
        assert_eq!(
            sentiment_summary(&[&a, &b, &c]),
            "Positive: 2, Neutral: 0, Negative: 1. Average confidence: 0.80"
        );
        assert_eq!(sentiment_summary(&[]), "No sentiment data available.");
    }

    #[test]
    fn prompt_caps_articles_and_body_length() {
        let cfg = PipelineConfig::default().summary;
        let articles: Vec<Article> = (1..=7).map(|n| article("AAPL", n)).collect();
        let prompt = build_prompt("AAPL", &articles, &[], &cfg);

        assert!(prompt.user.contains("Article 5:"));
        assert!(!prompt.user.contains("Article 6:"));
        assert!(prompt.user.contains(&"z".repeat(500)));
        assert!(!prompt.user.contains(&"z".repeat(501)));
        assert!(prompt.user.contains("AAPL"));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_ticker() {
        let fake = FakeSummarizer::new("MSFT", "NVDA");
        let mut cfg = PipelineConfig::default().summary;
        cfg.timeout = Duration::from_millis(50);
        let fan_out = SummaryFanOut::new(fake.clone(), cfg);

        let articles = BTreeMap::from([
            ("AAPL".to_string(), vec![article("AAPL", 1)]),
            ("MSFT".to_string(), vec![article("MSFT", 1)]),
            ("NVDA".to_string(), vec![article("NVDA", 1)]),
            ("TSLA".to_string(), Vec::new()),
        ]);
        let out = fan_out.summarize_all(&articles, &HashMap::new()).await;

        assert_eq!(out.len(), 4);
        assert_eq!(out["AAPL"], "AAPL looks fine.");
        assert_eq!(out["MSFT"], "MSFT: Unable to generate summary.");
        assert_eq!(out["NVDA"], "NVDA: Unable to generate summary.");
        assert_eq!(out["TSLA"], "TSLA: No articles available for summary.");
        // The empty ticker never reaches the backend.
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn summary_pool_overlaps_within_bound() {
        let fake = FakeSummarizer::new("", "");
        let cfg = PipelineConfig::default().summary;
        let fan_out = SummaryFanOut::new(fake.clone(), cfg.clone());

        let tickers = ["AAPL", "MSFT", "NVDA", "AMZN", "GOOG", "META", "TSLA"];
        let articles: BTreeMap<String, Vec<Article>> = tickers
            .iter()
            .map(|t| (t.to_string(), vec![article(t, 1)]))
            .collect();
        let out = fan_out.summarize_all(&articles, &HashMap::new()).await;

        assert_eq!(out.len(), articles.len());
        assert!(out.values().all(|s| s.ends_with("looks fine.")));
        let max = fake.max_in_flight.load(Ordering::SeqCst);
        assert!(max > 1, "summaries never overlapped");
        assert!(max <= cfg.concurrency, "{max} summaries in flight");
    }
}
