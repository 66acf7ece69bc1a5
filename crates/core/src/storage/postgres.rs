use crate::domain::{
    Article, Fingerprint, Holding, PipelineRun, Portfolio, RiskTier, RunStatus, SentimentLabel,
    SentimentResult, TickerAggregate, User,
};
use crate::storage::retry::{with_retry, RetryPolicy};
use crate::storage::{portfolio_to_store, Store};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

type ArticleRow = (i64, String, String, String, String, String, DateTime<Utc>);
type RunRow = (
    Uuid,
    i64,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<f64>,
);
type AggregateRow = (String, f64, f64, i32, String);

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
    retry: RetryPolicy,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    async fn get_or_insert_article_once(&self, article: &Article) -> Result<Article, sqlx::Error> {
        let fingerprint = article.fingerprint();
        let mut tx = self.pool.begin().await?;

        // ON CONFLICT keeps the first stored copy when two workers race on
        // the same fingerprint.
        sqlx::query(
            "INSERT INTO articles (fingerprint, ticker, headline, body, source, url, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (fingerprint) DO NOTHING",
        )
        .persistent(false)
        .bind(fingerprint.as_str())
        .bind(&article.ticker)
        .bind(&article.headline)
        .bind(&article.body)
        .bind(&article.source)
        .bind(&article.url)
        .bind(article.published_at)
        .execute(&mut *tx)
        .await?;

        let row: ArticleRow = sqlx::query_as(
            "SELECT id, ticker, headline, body, source, url, published_at \
             FROM articles WHERE fingerprint = $1",
        )
        .persistent(false)
        .bind(fingerprint.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(article_from_row(row))
    }

    async fn replace_holdings_once(
        &self,
        user_id: i64,
        holdings: &[Holding],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM holdings WHERE user_id = $1")
            .persistent(false)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let mut qb = sqlx::QueryBuilder::new("INSERT INTO holdings (user_id, ticker, weight) ");
        qb.push_values(holdings, |mut b, h| {
            b.push_bind(user_id).push_bind(&h.ticker).push_bind(h.weight);
        });
        qb.build().persistent(false).execute(&mut *tx).await?;

        tx.commit().await
    }

    async fn insert_sentiments_once(
        &self,
        rows: &[&SentimentResult],
        model_version: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO sentiment_scores (article_id, label, confidence, score, model_version) ",
        );
        qb.push_values(rows, |mut b, r| {
            b.push_bind(r.article_id)
                .push_bind(r.label.as_str())
                .push_bind(r.confidence)
                .push_bind(r.score)
                .push_bind(model_version);
        });
        qb.push(" ON CONFLICT (article_id) DO NOTHING");

        let res = qb.build().persistent(false).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(res.rows_affected())
    }

    async fn upsert_aggregates_once(
        &self,
        user_id: i64,
        date: NaiveDate,
        aggregates: &[TickerAggregate],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut qb = sqlx::QueryBuilder::new(
            "INSERT INTO ticker_sentiment_daily \
             (user_id, date, ticker, sentiment_score, avg_confidence, article_count, risk_tier) ",
        );
        qb.push_values(aggregates, |mut b, a| {
            b.push_bind(user_id)
                .push_bind(date)
                .push_bind(&a.ticker)
                .push_bind(a.sentiment_score)
                .push_bind(a.avg_confidence)
                .push_bind(a.article_count as i32)
                .push_bind(a.risk_tier.as_str());
        });
        qb.push(
            " ON CONFLICT (user_id, date, ticker) DO UPDATE \
               SET sentiment_score = EXCLUDED.sentiment_score, \
                   avg_confidence = EXCLUDED.avg_confidence, \
                   article_count = EXCLUDED.article_count, \
                   risk_tier = EXCLUDED.risk_tier, \
                   updated_at = now()",
        );

        let res = qb.build().persistent(false).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(res.rows_affected())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        let row: Option<(i64, String)> = with_retry(&self.retry, "select user", || {
            sqlx::query_as("SELECT id, email FROM users WHERE id = $1")
                .persistent(false)
                .bind(user_id)
                .fetch_optional(&self.pool)
        })
        .await?;
        Ok(row.map(|(id, email)| User { id, email }))
    }

    async fn list_user_ids(&self) -> anyhow::Result<Vec<i64>> {
        let rows: Vec<(i64,)> = with_retry(&self.retry, "select user ids", || {
            sqlx::query_as("SELECT id FROM users ORDER BY id")
                .persistent(false)
                .fetch_all(&self.pool)
        })
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_holdings(&self, user_id: i64) -> anyhow::Result<Vec<Holding>> {
        let rows: Vec<(String, f64)> = with_retry(&self.retry, "select holdings", || {
            sqlx::query_as("SELECT ticker, weight FROM holdings WHERE user_id = $1 ORDER BY ticker")
                .persistent(false)
                .bind(user_id)
                .fetch_all(&self.pool)
        })
        .await?;
        Ok(rows
            .into_iter()
            .map(|(ticker, weight)| Holding { ticker, weight })
            .collect())
    }

    async fn create_user(&self, email: &str) -> anyhow::Result<User> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let (id, email): (i64, String) = with_retry(&self.retry, "upsert user", || {
            sqlx::query_as(
                "INSERT INTO users (email) VALUES ($1) \
                 ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email \
                 RETURNING id, email",
            )
            .persistent(false)
            .bind(email)
            .fetch_one(&self.pool)
        })
        .await?;
        Ok(User { id, email })
    }

    async fn set_holdings(
        &self,
        user_id: i64,
        holdings: Vec<Holding>,
    ) -> anyhow::Result<Portfolio> {
        let portfolio = portfolio_to_store(user_id, holdings)?;
        anyhow::ensure!(
            self.get_user(user_id).await?.is_some(),
            "user {user_id} not found"
        );
        let rows = portfolio.holdings();
        with_retry(&self.retry, "replace holdings", move || {
            self.replace_holdings_once(user_id, rows)
        })
        .await?;
        Ok(portfolio)
    }

    async fn find_article_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<Article>> {
        let row: Option<ArticleRow> = with_retry(&self.retry, "select article", || {
            sqlx::query_as(
                "SELECT id, ticker, headline, body, source, url, published_at \
                 FROM articles WHERE fingerprint = $1",
            )
            .persistent(false)
            .bind(fingerprint.as_str())
            .fetch_optional(&self.pool)
        })
        .await?;
        Ok(row.map(article_from_row))
    }

    async fn insert_article(&self, article: &Article) -> anyhow::Result<i64> {
        let fingerprint = article.fingerprint();
        let id: i64 = with_retry(&self.retry, "insert article", || {
            sqlx::query_scalar(
                "INSERT INTO articles (fingerprint, ticker, headline, body, source, url, published_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING id",
            )
            .persistent(false)
            .bind(fingerprint.as_str())
            .bind(&article.ticker)
            .bind(&article.headline)
            .bind(&article.body)
            .bind(&article.source)
            .bind(&article.url)
            .bind(article.published_at)
            .fetch_one(&self.pool)
        })
        .await?;
        Ok(id)
    }

    async fn get_or_insert_article(&self, article: &Article) -> anyhow::Result<Article> {
        with_retry(&self.retry, "get or insert article", move || {
            self.get_or_insert_article_once(article)
        })
        .await
    }

    async fn find_sentiment(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<SentimentResult>> {
        let row: Option<(i64, String, f64, f64)> =
            with_retry(&self.retry, "select sentiment", || {
                sqlx::query_as(
                    "SELECT s.article_id, s.label, s.confidence, s.score \
                     FROM sentiment_scores s JOIN articles a ON a.id = s.article_id \
                     WHERE a.fingerprint = $1 \
                     ORDER BY s.created_at DESC \
                     LIMIT 1",
                )
                .persistent(false)
                .bind(fingerprint.as_str())
                .fetch_optional(&self.pool)
            })
            .await?;

        let Some((article_id, label, confidence, score)) = row else {
            return Ok(None);
        };
        let label: SentimentLabel = label
            .parse()
            .with_context(|| format!("invalid stored label for article_id={article_id}"))?;
        Ok(Some(SentimentResult {
            fingerprint: fingerprint.clone(),
            article_id: Some(article_id),
            label,
            confidence,
            score,
            degraded: false,
        }))
    }

    async fn insert_sentiment_results(
        &self,
        results: &[SentimentResult],
        model_version: &str,
    ) -> anyhow::Result<u64> {
        let rows: Vec<&SentimentResult> = results
            .iter()
            .filter(|r| !r.degraded && r.article_id.is_some())
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let rows = rows.as_slice();
        with_retry(&self.retry, "insert sentiment_scores", move || {
            self.insert_sentiments_once(rows, model_version)
        })
        .await
    }

    async fn upsert_ticker_aggregates(
        &self,
        user_id: i64,
        date: NaiveDate,
        aggregates: &[TickerAggregate],
    ) -> anyhow::Result<u64> {
        if aggregates.is_empty() {
            return Ok(0);
        }
        with_retry(&self.retry, "upsert ticker_sentiment_daily", move || {
            self.upsert_aggregates_once(user_id, date, aggregates)
        })
        .await
    }

    async fn insert_pipeline_run(&self, run: &PipelineRun) -> anyhow::Result<()> {
        with_retry(&self.retry, "insert pipeline_runs", || {
            sqlx::query(
                "INSERT INTO pipeline_runs (id, user_id, status, started_at) VALUES ($1, $2, $3, $4)",
            )
            .persistent(false)
            .bind(run.id)
            .bind(run.user_id)
            .bind(run.status.as_str())
            .bind(run.started_at)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn finish_pipeline_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            RunStatus::Running.can_transition_to(status),
            "invalid terminal status {}",
            status.as_str()
        );

        let res = with_retry(&self.retry, "update pipeline_runs", || {
            sqlx::query(
                "UPDATE pipeline_runs \
                 SET status = $2, completed_at = $3, error_message = $4, \
                     duration_seconds = EXTRACT(EPOCH FROM ($3 - started_at))::DOUBLE PRECISION \
                 WHERE id = $1 AND status = 'running'",
            )
            .persistent(false)
            .bind(run_id)
            .bind(status.as_str())
            .bind(completed_at)
            .bind(error_message)
            .execute(&self.pool)
        })
        .await?;

        anyhow::ensure!(
            res.rows_affected() == 1,
            "pipeline run {run_id} is missing or already terminal"
        );
        Ok(())
    }

    async fn latest_pipeline_runs(
        &self,
        user_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<PipelineRun>> {
        let rows: Vec<RunRow> = with_retry(&self.retry, "select pipeline_runs", || {
            sqlx::query_as(
                "SELECT id, user_id, status, started_at, completed_at, error_message, duration_seconds \
                 FROM pipeline_runs \
                 WHERE user_id = $1 \
                 ORDER BY started_at DESC \
                 LIMIT $2",
            )
            .persistent(false)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
        })
        .await?;

        rows.into_iter()
            .map(|(id, user_id, status, started_at, completed_at, error_message, duration_seconds)| {
                let status = RunStatus::parse(&status)
                    .with_context(|| format!("invalid status {status:?} for run {id}"))?;
                Ok(PipelineRun {
                    id,
                    user_id,
                    status,
                    started_at,
                    completed_at,
                    error_message,
                    duration_seconds,
                })
            })
            .collect()
    }

    async fn ticker_aggregates_for(
        &self,
        user_id: i64,
        date: Option<NaiveDate>,
    ) -> anyhow::Result<Option<(NaiveDate, Vec<TickerAggregate>)>> {
        let date = match date {
            Some(d) => d,
            None => {
                let latest: Option<(NaiveDate,)> =
                    with_retry(&self.retry, "select latest snapshot date", || {
                        sqlx::query_as(
                            "SELECT MAX(date) FROM ticker_sentiment_daily WHERE user_id = $1 HAVING MAX(date) IS NOT NULL",
                        )
                        .persistent(false)
                        .bind(user_id)
                        .fetch_optional(&self.pool)
                    })
                    .await?;
                let Some((d,)) = latest else {
                    return Ok(None);
                };
                d
            }
        };

        let rows: Vec<AggregateRow> = with_retry(&self.retry, "select ticker_sentiment_daily", || {
            sqlx::query_as(
                "SELECT ticker, sentiment_score, avg_confidence, article_count, risk_tier \
                 FROM ticker_sentiment_daily \
                 WHERE user_id = $1 AND date = $2 \
                 ORDER BY ticker",
            )
            .persistent(false)
            .bind(user_id)
            .bind(date)
            .fetch_all(&self.pool)
        })
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(rows.len());
        for (ticker, sentiment_score, avg_confidence, article_count, risk_tier) in rows {
            let risk_tier = RiskTier::parse(&risk_tier)
                .with_context(|| format!("invalid risk tier {risk_tier:?} for {ticker} on {date}"))?;
            out.push(TickerAggregate {
                ticker,
                sentiment_score,
                avg_confidence,
                article_count: article_count.max(0) as usize,
                risk_tier,
            });
        }
        Ok(Some((date, out)))
    }

    async fn record_delivery(
        &self,
        user_id: i64,
        run_id: Uuid,
        delivered: bool,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let status = if delivered { "sent" } else { "failed" };
        with_retry(&self.retry, "insert delivery_log", || {
            sqlx::query(
                "INSERT INTO delivery_log (user_id, run_id, status, error_message) VALUES ($1, $2, $3, $4)",
            )
            .persistent(false)
            .bind(user_id)
            .bind(run_id)
            .bind(status)
            .bind(error_message)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }
}

fn article_from_row(row: ArticleRow) -> Article {
    let (id, ticker, headline, body, source, url, published_at) = row;
    Article {
        id: Some(id),
        ticker,
        headline,
        body,
        source,
        url,
        published_at,
    }
}
