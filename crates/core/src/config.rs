use anyhow::{ensure, Context};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub newsapi_key: Option<String>,
    pub finnhub_key: Option<String>,
    pub sentiment_service_url: Option<String>,
    pub llm_provider: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub email_from: Option<String>,
    pub sentry_dsn: Option<String>,
    pub log_format: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            newsapi_key: std::env::var("NEWSAPI_KEY").ok(),
            finnhub_key: std::env::var("FINNHUB_KEY").ok(),
            sentiment_service_url: std::env::var("SENTIMENT_SERVICE_URL").ok(),
            llm_provider: std::env::var("LLM_PROVIDER").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
            smtp_host: std::env::var("SMTP_HOST").ok(),
            smtp_username: std::env::var("SMTP_USERNAME").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            log_format: std::env::var("LOG_FORMAT").ok(),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_newsapi_key(&self) -> anyhow::Result<&str> {
        self.newsapi_key.as_deref().context("NEWSAPI_KEY is required")
    }

    pub fn require_finnhub_key(&self) -> anyhow::Result<&str> {
        self.finnhub_key.as_deref().context("FINNHUB_KEY is required")
    }

    pub fn require_sentiment_service_url(&self) -> anyhow::Result<&str> {
        self.sentiment_service_url
            .as_deref()
            .context("SENTIMENT_SERVICE_URL is required")
    }

    pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is required")
    }

    pub fn require_openrouter_api_key(&self) -> anyhow::Result<&str> {
        self.openrouter_api_key
            .as_deref()
            .context("OPENROUTER_API_KEY is required")
    }

    pub fn json_logs(&self) -> bool {
        self.log_format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

/// Tunables for every pipeline stage. All formulas that are not derived from
/// first principles (neutral lean, risk confidence base, weight tables) live
/// here so they stay deterministic and overridable.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub news: NewsConfig,
    pub sentiment: SentimentConfig,
    pub aggregation: AggregationConfig,
    pub risk: RiskConfig,
    pub summary: SummaryConfig,
    pub run_deadline: Duration,
    pub storage_retry_attempts: u32,
    pub storage_retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct NewsConfig {
    pub window_hours: i64,
    pub min_article_length: usize,
    pub max_content_chars: usize,
    pub max_articles_per_ticker: usize,
    /// Primary results below this count trigger the secondary provider.
    pub fallback_threshold: usize,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub batch_size: usize,
    pub text_body_chars: usize,
    pub neutral_lean_margin: f64,
    pub neutral_lean_factor: f64,
    pub model_version: String,
}

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// (max age in hours, weight), checked in order; older articles weigh 0.
    pub recency_steps: Vec<(f64, f64)>,
    /// (case-insensitive source substring, weight).
    pub source_weights: Vec<(String, f64)>,
    pub default_source_weight: f64,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub threshold_low: f64,
    pub threshold_medium: f64,
    pub threshold_high: f64,
    pub confidence_base: f64,
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_articles: usize,
    pub body_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            news: NewsConfig {
                window_hours: 24,
                min_article_length: 300,
                max_content_chars: 5000,
                max_articles_per_ticker: 5,
                fallback_threshold: 3,
                concurrency: 5,
                fetch_timeout: Duration::from_secs(30),
            },
            sentiment: SentimentConfig {
                batch_size: 8,
                text_body_chars: 500,
                neutral_lean_margin: 0.1,
                neutral_lean_factor: 0.3,
                model_version: "ProsusAI/finbert".to_string(),
            },
            aggregation: AggregationConfig {
                recency_steps: vec![(6.0, 1.0), (12.0, 0.8), (24.0, 0.6)],
                source_weights: vec![
                    ("reuters".to_string(), 1.0),
                    ("bloomberg".to_string(), 0.95),
                    ("cnbc".to_string(), 0.85),
                ],
                default_source_weight: 0.6,
            },
            risk: RiskConfig {
                threshold_low: 0.10,
                threshold_medium: 0.35,
                threshold_high: 0.60,
                confidence_base: 0.5,
            },
            summary: SummaryConfig {
                concurrency: 3,
                timeout: Duration::from_secs(60),
                max_articles: 5,
                body_chars: 500,
            },
            run_deadline: Duration::from_secs(600),
            storage_retry_attempts: 3,
            storage_retry_backoff: Duration::from_millis(200),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        cfg.news.window_hours = env_or("NEWS_TIME_WINDOW_HOURS", cfg.news.window_hours)?;
        cfg.news.min_article_length =
            env_or("NEWS_MIN_ARTICLE_LENGTH", cfg.news.min_article_length)?;
        cfg.news.max_content_chars = env_or("NEWS_MAX_CONTENT_CHARS", cfg.news.max_content_chars)?;
        cfg.news.max_articles_per_ticker =
            env_or("NEWS_MAX_ARTICLES_PER_TICKER", cfg.news.max_articles_per_ticker)?;
        cfg.news.fallback_threshold = env_or("NEWS_FALLBACK_THRESHOLD", cfg.news.fallback_threshold)?;
        cfg.news.concurrency = env_or("NEWS_CONCURRENCY", cfg.news.concurrency)?;
        cfg.news.fetch_timeout = Duration::from_secs(env_or(
            "NEWS_FETCH_TIMEOUT_SECS",
            cfg.news.fetch_timeout.as_secs(),
        )?);

        cfg.sentiment.batch_size = env_or("SENTIMENT_BATCH_SIZE", cfg.sentiment.batch_size)?;
        cfg.sentiment.neutral_lean_margin =
            env_or("SENTIMENT_NEUTRAL_LEAN_MARGIN", cfg.sentiment.neutral_lean_margin)?;
        cfg.sentiment.neutral_lean_factor =
            env_or("SENTIMENT_NEUTRAL_LEAN_FACTOR", cfg.sentiment.neutral_lean_factor)?;
        if let Ok(model) = std::env::var("SENTIMENT_MODEL") {
            if !model.trim().is_empty() {
                cfg.sentiment.model_version = model;
            }
        }

        let steps = &mut cfg.aggregation.recency_steps;
        steps[0].1 = env_or("RECENCY_WEIGHT_6H", steps[0].1)?;
        steps[1].1 = env_or("RECENCY_WEIGHT_12H", steps[1].1)?;
        steps[2].1 = env_or("RECENCY_WEIGHT_24H", steps[2].1)?;
        for (name, weight) in cfg.aggregation.source_weights.iter_mut() {
            let key = format!("SOURCE_WEIGHT_{}", name.to_ascii_uppercase());
            *weight = env_or(&key, *weight)?;
        }
        cfg.aggregation.default_source_weight =
            env_or("SOURCE_WEIGHT_DEFAULT", cfg.aggregation.default_source_weight)?;

        cfg.risk.threshold_low = env_or("RISK_THRESHOLD_LOW", cfg.risk.threshold_low)?;
        cfg.risk.threshold_medium = env_or("RISK_THRESHOLD_MEDIUM", cfg.risk.threshold_medium)?;
        cfg.risk.threshold_high = env_or("RISK_THRESHOLD_HIGH", cfg.risk.threshold_high)?;
        cfg.risk.confidence_base = env_or("RISK_CONFIDENCE_BASE", cfg.risk.confidence_base)?;

        cfg.summary.concurrency = env_or("SUMMARY_CONCURRENCY", cfg.summary.concurrency)?;
        cfg.summary.timeout =
            Duration::from_secs(env_or("SUMMARY_TIMEOUT_SECS", cfg.summary.timeout.as_secs())?);

        cfg.run_deadline =
            Duration::from_secs(env_or("PIPELINE_DEADLINE_SECS", cfg.run_deadline.as_secs())?);
        cfg.storage_retry_attempts = env_or("STORAGE_RETRY_ATTEMPTS", cfg.storage_retry_attempts)?;
        cfg.storage_retry_backoff = Duration::from_millis(env_or(
            "STORAGE_RETRY_BACKOFF_MS",
            cfg.storage_retry_backoff.as_millis() as u64,
        )?);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let r = &self.risk;
        ensure!(
            r.threshold_low < r.threshold_medium && r.threshold_medium < r.threshold_high,
            "risk thresholds must be strictly increasing (got {}, {}, {})",
            r.threshold_low,
            r.threshold_medium,
            r.threshold_high
        );
        ensure!(r.confidence_base >= 0.0, "RISK_CONFIDENCE_BASE must be >= 0");

        let agg = &self.aggregation;
        for (name, weight) in &agg.source_weights {
            ensure!(
                agg.default_source_weight < *weight,
                "default source weight {} must be below known outlet {name} ({weight})",
                agg.default_source_weight
            );
        }
        ensure!(
            agg.recency_steps
                .windows(2)
                .all(|w| w[0].0 < w[1].0 && w[0].1 >= w[1].1),
            "recency steps must have increasing ages and non-increasing weights"
        );

        ensure!(self.sentiment.batch_size >= 1, "SENTIMENT_BATCH_SIZE must be >= 1");
        ensure!(self.news.concurrency >= 1, "NEWS_CONCURRENCY must be >= 1");
        ensure!(self.summary.concurrency >= 1, "SUMMARY_CONCURRENCY must be >= 1");
        ensure!(self.news.window_hours > 0, "NEWS_TIME_WINDOW_HOURS must be > 0");
        ensure!(
            self.storage_retry_attempts >= 1,
            "STORAGE_RETRY_ATTEMPTS must be >= 1"
        );
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    parse_tunable(key, std::env::var(key).ok().as_deref(), default)
}

/// Unset or blank keeps the default; anything else must parse.
fn parse_tunable<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> anyhow::Result<T> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value {v:?} for {key}")),
    }
}
