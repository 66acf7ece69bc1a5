use crate::domain::{
    Article, Fingerprint, Holding, PipelineRun, Portfolio, RunStatus, SentimentResult,
    TickerAggregate, User,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

pub mod lock;
pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Validates and normalizes holdings before they are written.
pub(crate) fn portfolio_to_store(
    user_id: i64,
    holdings: Vec<Holding>,
) -> anyhow::Result<Portfolio> {
    let mut portfolio = Portfolio::from_holdings(user_id, holdings)?;
    if let Some(raw_sum) = portfolio.normalize() {
        tracing::warn!(user_id, raw_sum, "holding weights do not sum to 1.0; storing normalized");
    }
    Ok(portfolio)
}

/// Persistence boundary used by the pipeline. Every method is one short
/// logical operation; implementations must not hold a transaction across
/// calls.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>>;

    async fn list_user_ids(&self) -> anyhow::Result<Vec<i64>>;

    async fn get_holdings(&self, user_id: i64) -> anyhow::Result<Vec<Holding>>;

    /// Inserts a user, or returns the existing one with the same email.
    async fn create_user(&self, email: &str) -> anyhow::Result<User>;

    /// Replaces every holding of `user_id` in one step. The holdings are
    /// validated and stored with normalized weights; invalid input leaves
    /// the previous holdings untouched.
    async fn set_holdings(&self, user_id: i64, holdings: Vec<Holding>)
        -> anyhow::Result<Portfolio>;

    async fn find_article_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<Article>>;

    async fn insert_article(&self, article: &Article) -> anyhow::Result<i64>;

    /// Returns the canonical stored article for `article`'s fingerprint,
    /// inserting it first when none exists. An existing record wins, so the
    /// original `published_at` and body survive resubmission.
    async fn get_or_insert_article(&self, article: &Article) -> anyhow::Result<Article> {
        if let Some(existing) = self
            .find_article_by_fingerprint(&article.fingerprint())
            .await?
        {
            return Ok(existing);
        }
        let id = self.insert_article(article).await?;
        Ok(Article {
            id: Some(id),
            ..article.clone()
        })
    }

    async fn find_sentiment(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<SentimentResult>>;

    /// Stores results for persisted articles. Degraded placeholders are skipped.
    async fn insert_sentiment_results(
        &self,
        results: &[SentimentResult],
        model_version: &str,
    ) -> anyhow::Result<u64>;

    /// Same-day re-runs overwrite the existing snapshot rows.
    async fn upsert_ticker_aggregates(
        &self,
        user_id: i64,
        date: NaiveDate,
        aggregates: &[TickerAggregate],
    ) -> anyhow::Result<u64>;

    async fn insert_pipeline_run(&self, run: &PipelineRun) -> anyhow::Result<()>;

    /// Moves a `running` record to a terminal status. Fails when the record is
    /// missing or already terminal.
    async fn finish_pipeline_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn latest_pipeline_runs(&self, user_id: i64, limit: i64)
        -> anyhow::Result<Vec<PipelineRun>>;

    /// Snapshot rows for `date`, or for the most recent stored date when `None`.
    async fn ticker_aggregates_for(
        &self,
        user_id: i64,
        date: Option<NaiveDate>,
    ) -> anyhow::Result<Option<(NaiveDate, Vec<TickerAggregate>)>>;

    async fn record_delivery(
        &self,
        user_id: i64,
        run_id: Uuid,
        delivered: bool,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;
}
