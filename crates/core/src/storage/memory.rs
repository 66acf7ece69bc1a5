use crate::domain::{
    Article, Fingerprint, Holding, PipelineRun, Portfolio, RunStatus, SentimentResult,
    TickerAggregate, User,
};
use crate::storage::{portfolio_to_store, Store};
use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// In-process `Store` used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_user_id: i64,
    next_article_id: i64,
    users: BTreeMap<i64, User>,
    holdings: BTreeMap<i64, Vec<Holding>>,
    articles: HashMap<Fingerprint, Article>,
    sentiments: HashMap<Fingerprint, (SentimentResult, String)>,
    aggregates: BTreeMap<(i64, NaiveDate, String), TickerAggregate>,
    runs: Vec<PipelineRun>,
    deliveries: Vec<DeliveryRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub user_id: i64,
    pub run_id: Uuid,
    pub delivered: bool,
    pub error_message: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }

    pub fn add_user(&self, email: &str, holdings: Vec<Holding>) -> anyhow::Result<i64> {
        let mut inner = self.lock()?;
        inner.next_user_id += 1;
        let id = inner.next_user_id;
        inner.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
            },
        );
        inner.holdings.insert(id, holdings);
        Ok(id)
    }

    pub fn pipeline_runs(&self) -> anyhow::Result<Vec<PipelineRun>> {
        Ok(self.lock()?.runs.clone())
    }

    pub fn articles(&self) -> anyhow::Result<Vec<Article>> {
        let mut out: Vec<Article> = self.lock()?.articles.values().cloned().collect();
        out.sort_by_key(|a| a.id);
        Ok(out)
    }

    pub fn sentiment_count(&self) -> anyhow::Result<usize> {
        Ok(self.lock()?.sentiments.len())
    }

    pub fn deliveries(&self) -> anyhow::Result<Vec<DeliveryRecord>> {
        Ok(self.lock()?.deliveries.clone())
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: i64) -> anyhow::Result<Option<User>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn list_user_ids(&self) -> anyhow::Result<Vec<i64>> {
        Ok(self.lock()?.users.keys().copied().collect())
    }

    async fn get_holdings(&self, user_id: i64) -> anyhow::Result<Vec<Holding>> {
        Ok(self
            .lock()?
            .holdings
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_user(&self, email: &str) -> anyhow::Result<User> {
        let existing = self
            .lock()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned();
        if let Some(user) = existing {
            return Ok(user);
        }
        let id = self.add_user(email, Vec::new())?;
        Ok(User {
            id,
            email: email.to_string(),
        })
    }

    async fn set_holdings(
        &self,
        user_id: i64,
        holdings: Vec<Holding>,
    ) -> anyhow::Result<Portfolio> {
        let portfolio = portfolio_to_store(user_id, holdings)?;
        let mut inner = self.lock()?;
        anyhow::ensure!(inner.users.contains_key(&user_id), "user {user_id} not found");
        let mut stored = portfolio.holdings().to_vec();
        stored.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        inner.holdings.insert(user_id, stored);
        Ok(portfolio)
    }

    async fn find_article_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<Article>> {
        Ok(self.lock()?.articles.get(fingerprint).cloned())
    }

    async fn insert_article(&self, article: &Article) -> anyhow::Result<i64> {
        let mut inner = self.lock()?;
        let fingerprint = article.fingerprint();
        anyhow::ensure!(
            !inner.articles.contains_key(&fingerprint),
            "article {fingerprint} already stored"
        );
        inner.next_article_id += 1;
        let id = inner.next_article_id;
        inner.articles.insert(
            fingerprint,
            Article {
                id: Some(id),
                ..article.clone()
            },
        );
        Ok(id)
    }

    async fn get_or_insert_article(&self, article: &Article) -> anyhow::Result<Article> {
        let mut inner = self.lock()?;
        let fingerprint = article.fingerprint();
        if let Some(existing) = inner.articles.get(&fingerprint) {
            return Ok(existing.clone());
        }
        inner.next_article_id += 1;
        let stored = Article {
            id: Some(inner.next_article_id),
            ..article.clone()
        };
        inner.articles.insert(fingerprint, stored.clone());
        Ok(stored)
    }

    async fn find_sentiment(
        &self,
        fingerprint: &Fingerprint,
    ) -> anyhow::Result<Option<SentimentResult>> {
        Ok(self
            .lock()?
            .sentiments
            .get(fingerprint)
            .map(|(r, _)| r.clone()))
    }

    async fn insert_sentiment_results(
        &self,
        results: &[SentimentResult],
        model_version: &str,
    ) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        let mut inserted = 0;
        for r in results.iter().filter(|r| !r.degraded && r.article_id.is_some()) {
            if !inner.sentiments.contains_key(&r.fingerprint) {
                inner
                    .sentiments
                    .insert(r.fingerprint.clone(), (r.clone(), model_version.to_string()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_ticker_aggregates(
        &self,
        user_id: i64,
        date: NaiveDate,
        aggregates: &[TickerAggregate],
    ) -> anyhow::Result<u64> {
        let mut inner = self.lock()?;
        for a in aggregates {
            inner
                .aggregates
                .insert((user_id, date, a.ticker.clone()), a.clone());
        }
        Ok(aggregates.len() as u64)
    }

    async fn insert_pipeline_run(&self, run: &PipelineRun) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        anyhow::ensure!(
            inner.runs.iter().all(|r| r.id != run.id),
            "pipeline run {} already exists",
            run.id
        );
        inner.runs.push(run.clone());
        Ok(())
    }

    async fn finish_pipeline_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| anyhow!("pipeline run {run_id} not found"))?;
        anyhow::ensure!(
            run.status.can_transition_to(status),
            "pipeline run {run_id} cannot move from {} to {}",
            run.status.as_str(),
            status.as_str()
        );
        run.status = status;
        run.completed_at = Some(completed_at);
        run.error_message = error_message.map(str::to_string);
        run.duration_seconds =
            Some((completed_at - run.started_at).num_milliseconds() as f64 / 1000.0);
        Ok(())
    }

    async fn latest_pipeline_runs(
        &self,
        user_id: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<PipelineRun>> {
        let inner = self.lock()?;
        let mut runs: Vec<PipelineRun> = inner
            .runs
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn ticker_aggregates_for(
        &self,
        user_id: i64,
        date: Option<NaiveDate>,
    ) -> anyhow::Result<Option<(NaiveDate, Vec<TickerAggregate>)>> {
        let inner = self.lock()?;
        let date = match date {
            Some(d) => d,
            None => {
                let latest = inner
                    .aggregates
                    .keys()
                    .filter(|(u, _, _)| *u == user_id)
                    .map(|(_, d, _)| *d)
                    .max();
                match latest {
                    Some(d) => d,
                    None => return Ok(None),
                }
            }
        };
        let rows: Vec<TickerAggregate> = inner
            .aggregates
            .iter()
            .filter(|((u, d, _), _)| *u == user_id && *d == date)
            .map(|(_, a)| a.clone())
            .collect();
        Ok((!rows.is_empty()).then_some((date, rows)))
    }

    async fn record_delivery(
        &self,
        user_id: i64,
        run_id: Uuid,
        delivered: bool,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        self.lock()?.deliveries.push(DeliveryRecord {
            user_id,
            run_id,
            delivered,
            error_message: error_message.map(str::to_string),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RiskTier, SentimentLabel};
    use chrono::TimeZone;

    fn article(headline: &str, published_hour: u32) -> Article {
        Article {
            id: None,
            ticker: "AAPL".to_string(),
            headline: headline.to_string(),
            body: "body".to_string(),
            source: "Reuters".to_string(),
            url: format!("https://example.com/{published_hour}"),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, published_hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn get_or_insert_keeps_original_record() {
        let store = MemoryStore::new();
        let first = store.get_or_insert_article(&article("Same", 8)).await.unwrap();
        let again = store.get_or_insert_article(&article("Same", 11)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.published_at, first.published_at);
        assert_eq!(store.articles().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_records_allow_a_single_terminal_transition() {
        let store = MemoryStore::new();
        let started = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let run = PipelineRun::start(1, started);
        store.insert_pipeline_run(&run).await.unwrap();

        let done = started + chrono::Duration::seconds(90);
        store
            .finish_pipeline_run(run.id, RunStatus::Completed, done, None)
            .await
            .unwrap();
        assert!(store
            .finish_pipeline_run(run.id, RunStatus::Failed, done, Some("late"))
            .await
            .is_err());

        let runs = store.pipeline_runs().unwrap();
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].duration_seconds, Some(90.0));
    }

    #[tokio::test]
    async fn same_day_aggregates_overwrite() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut agg = TickerAggregate {
            ticker: "AAPL".to_string(),
            sentiment_score: 0.4,
            avg_confidence: 0.8,
            article_count: 2,
            risk_tier: RiskTier::Medium,
        };
        store.upsert_ticker_aggregates(1, date, &[agg.clone()]).await.unwrap();
        agg.sentiment_score = -0.2;
        store.upsert_ticker_aggregates(1, date, &[agg]).await.unwrap();

        let (d, rows) = store.ticker_aggregates_for(1, None).await.unwrap().unwrap();
        assert_eq!(d, date);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sentiment_score, -0.2);
    }

    #[tokio::test]
    async fn degraded_sentiments_are_not_persisted() {
        let store = MemoryStore::new();
        let stored = store.get_or_insert_article(&article("Head", 8)).await.unwrap();
        let fp = stored.fingerprint();
        let degraded = SentimentResult::degraded(fp.clone(), stored.id);
        assert_eq!(store.insert_sentiment_results(&[degraded], "m").await.unwrap(), 0);

        let real = SentimentResult {
            fingerprint: fp.clone(),
            article_id: stored.id,
            label: SentimentLabel::Positive,
            confidence: 0.9,
            score: 0.95,
            degraded: false,
        };
        assert_eq!(store.insert_sentiment_results(&[real], "m").await.unwrap(), 1);
        assert!(store.find_sentiment(&fp).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_user_is_idempotent_per_email() {
        let store = MemoryStore::new();
        let first = store.create_user("a@example.com").await.unwrap();
        let again = store.create_user("a@example.com").await.unwrap();
        let other = store.create_user("b@example.com").await.unwrap();
        assert_eq!(first, again);
        assert_ne!(first.id, other.id);
        assert_eq!(store.list_user_ids().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_holdings_replaces_with_normalized_weights() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com").await.unwrap();
        let h = |ticker: &str, weight: f64| Holding {
            ticker: ticker.to_string(),
            weight,
        };
        store
            .set_holdings(user.id, vec![h("AAPL", 0.5), h("MSFT", 0.5)])
            .await
            .unwrap();

        let portfolio = store
            .set_holdings(user.id, vec![h("nvda", 0.3), h("TSLA", 0.3)])
            .await
            .unwrap();
        assert_eq!(portfolio.tickers(), vec!["NVDA", "TSLA"]);

        let stored = store.get_holdings(user.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].ticker, "NVDA");
        assert!((stored[0].weight - 0.5).abs() < 1e-9);
        assert!((stored.iter().map(|h| h.weight).sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_holdings_keep_the_previous_set() {
        let store = MemoryStore::new();
        let user = store.create_user("a@example.com").await.unwrap();
        let h = |ticker: &str, weight: f64| Holding {
            ticker: ticker.to_string(),
            weight,
        };
        store.set_holdings(user.id, vec![h("AAPL", 1.0)]).await.unwrap();

        assert!(store
            .set_holdings(user.id, vec![h("AAPL", 0.5), h("aapl", 0.5)])
            .await
            .is_err());
        assert!(store.set_holdings(user.id, Vec::new()).await.is_err());
        assert!(store.set_holdings(99, vec![h("AAPL", 1.0)]).await.is_err());

        let stored = store.get_holdings(user.id).await.unwrap();
        assert_eq!(stored, vec![h("AAPL", 1.0)]);
    }
}
