use crate::config::PipelineConfig;
use crate::delivery::DeliveryChannel;
use crate::domain::{PipelineRun, Portfolio, RunStatus, User};
use crate::error::{PipelineError, Stage};
use crate::news::NewsFetcher;
use crate::sentiment::SentimentScorer;
use crate::storage::Store;
use crate::summarize::SummaryFanOut;
use chrono::{NaiveDate, Utc};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub mod stages;
pub mod state;

pub use state::RunState;

#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: Uuid,
    /// Whether the report reached the user. A computed report with a failed
    /// delivery is still a completed run.
    pub delivered: bool,
    pub state: RunState,
}

/// Runs the fixed stage sequence for one user:
/// portfolio → news → sentiment → aggregate → summarize → risk → deliver.
pub struct Orchestrator {
    store: Arc<dyn Store>,
    news: NewsFetcher,
    scorer: SentimentScorer,
    summaries: SummaryFanOut,
    delivery: Arc<dyn DeliveryChannel>,
    cfg: PipelineConfig,
    report_date: Option<NaiveDate>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        news: NewsFetcher,
        scorer: SentimentScorer,
        summaries: SummaryFanOut,
        delivery: Arc<dyn DeliveryChannel>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            store,
            news,
            scorer,
            summaries,
            delivery,
            cfg,
            report_date: None,
        }
    }

    /// Snapshot date override; defaults to the UTC date at run start.
    pub fn with_report_date(mut self, date: NaiveDate) -> Self {
        self.report_date = Some(date);
        self
    }

    /// Input errors return before a run record exists. Past that point the
    /// run record receives exactly one terminal write, whatever happens.
    pub async fn run(&self, user_id: i64) -> Result<RunResult, PipelineError> {
        let started_at = Utc::now();
        let (user, portfolio) = self.load_portfolio(user_id).await?;

        let run = PipelineRun::start(user_id, started_at);
        self.store
            .insert_pipeline_run(&run)
            .await
            .map_err(PipelineError::Storage)?;
        tracing::info!(run_id = %run.id, user_id, tickers = portfolio.holdings().len(), "pipeline run started");

        let report_date = self.report_date.unwrap_or_else(|| started_at.date_naive());
        let state = RunState::new(run.id, user, portfolio, report_date, started_at);

        let outcome = AssertUnwindSafe(tokio::time::timeout(
            self.cfg.run_deadline,
            self.execute(state),
        ))
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Ok(res)) => res,
            Ok(Err(_elapsed)) => Err(PipelineError::DeadlineExceeded(self.cfg.run_deadline)),
            Err(panic) => Err(PipelineError::Panicked(panic_message(&*panic))),
        };

        let completed_at = Utc::now();
        let (status, error_message) = match &result {
            Ok(_) => (RunStatus::Completed, None),
            Err(err) => (RunStatus::Failed, Some(err.to_string())),
        };
        if let Err(err) = self
            .store
            .finish_pipeline_run(run.id, status, completed_at, error_message.as_deref())
            .await
        {
            tracing::error!(run_id = %run.id, error = %format!("{err:#}"), "failed to record run outcome");
        }

        let elapsed_ms = (completed_at - started_at).num_milliseconds();
        match &result {
            Ok(state) => tracing::info!(
                run_id = %run.id,
                user_id,
                delivered = state.delivered,
                elapsed_ms,
                "pipeline run completed"
            ),
            Err(err) => tracing::error!(
                run_id = %run.id,
                user_id,
                elapsed_ms,
                error = %err,
                "pipeline run failed"
            ),
        }

        result.map(|state| RunResult {
            run_id: run.id,
            delivered: state.delivered,
            state,
        })
    }

    async fn load_portfolio(&self, user_id: i64) -> Result<(User, Portfolio), PipelineError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(PipelineError::Storage)?
            .ok_or(PipelineError::NotFound(user_id))?;
        let holdings = self
            .store
            .get_holdings(user_id)
            .await
            .map_err(PipelineError::Storage)?;

        let mut portfolio = Portfolio::from_holdings(user_id, holdings)?;
        if let Some(raw_sum) = portfolio.normalize() {
            tracing::warn!(user_id, raw_sum, "holding weights did not sum to 1.0; normalized");
        }
        Ok((user, portfolio))
    }

    async fn execute(&self, state: RunState) -> Result<RunState, PipelineError> {
        let store = self.store.as_ref();
        let run_id = state.run_id;

        let state = timed(run_id, Stage::News, stages::fetch_news(store, &self.news, state)).await?;
        let state = timed(
            run_id,
            Stage::Sentiment,
            stages::score_sentiment(store, &self.scorer, state),
        )
        .await?;
        let state = timed(run_id, Stage::Aggregate, async {
            stages::aggregate(&self.cfg, state)
        })
        .await?;
        let state = timed(run_id, Stage::Summarize, stages::summarize(&self.summaries, state)).await?;
        let state = timed(run_id, Stage::Risk, stages::assess_risk(store, &self.cfg, state)).await?;
        timed(
            run_id,
            Stage::Deliver,
            stages::deliver(store, self.delivery.as_ref(), state),
        )
        .await
    }
}

async fn timed<F>(run_id: Uuid, stage: Stage, fut: F) -> Result<RunState, PipelineError>
where
    F: Future<Output = Result<RunState, PipelineError>>,
{
    let started = Instant::now();
    let res = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &res {
        Ok(_) => tracing::info!(%run_id, stage = stage.as_str(), elapsed_ms, "stage finished"),
        Err(err) => tracing::error!(%run_id, stage = stage.as_str(), elapsed_ms, error = %err, "stage failed"),
    }
    res
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
