use crate::config::PipelineConfig;
use crate::delivery::{DeliveryChannel, Headline, ReportPayload, TickerReport, HEADLINES_PER_TICKER};
use crate::domain::{Article, RiskTier, TickerAggregate};
use crate::error::{PipelineError, Stage};
use crate::news::dedup::dedup_by_fingerprint;
use crate::news::{FetchWindow, NewsFetcher};
use crate::pipeline::state::RunState;
use crate::risk;
use crate::sentiment::{aggregate_ticker, SentimentScorer, TickerScore};
use crate::storage::Store;
use crate::summarize::SummaryFanOut;
use anyhow::Context;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;

/// Fetches every held ticker on a bounded pool, dedups within the ticker and
/// resolves each article against the store. Provider trouble yields an empty
/// list; a storage failure fails the stage.
pub async fn fetch_news(
    store: &dyn Store,
    fetcher: &NewsFetcher,
    mut state: RunState,
) -> Result<RunState, PipelineError> {
    let window = FetchWindow::last_hours(state.started_at, fetcher.config().window_hours);
    let concurrency = fetcher.config().concurrency.max(1);

    let fetched: Vec<(String, anyhow::Result<Vec<Article>>)> =
        stream::iter(state.portfolio.tickers())
            .map(|ticker| async move {
                let articles = dedup_by_fingerprint(fetcher.fetch_articles(&ticker, &window).await);
                let stored = persist_articles(store, &ticker, articles).await;
                (ticker, stored)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

    for (ticker, stored) in fetched {
        let articles = stored.map_err(|e| PipelineError::stage(Stage::News, e))?;
        if articles.is_empty() {
            tracing::warn!(run_id = %state.run_id, %ticker, "no qualifying articles");
        }
        state.articles.insert(ticker, articles);
    }
    Ok(state)
}

async fn persist_articles(
    store: &dyn Store,
    ticker: &str,
    articles: Vec<Article>,
) -> anyhow::Result<Vec<Article>> {
    let mut out = Vec::with_capacity(articles.len());
    for article in articles {
        let stored = store
            .get_or_insert_article(&article)
            .await
            .with_context(|| format!("failed to store article {} for {ticker}", article.fingerprint()))?;
        if stored.published_at != article.published_at {
            tracing::debug!(
                ticker,
                fingerprint = %stored.fingerprint(),
                "reusing previously stored article"
            );
        }
        out.push(stored);
    }
    Ok(out)
}

/// Reuses stored sentiment, scores the rest in batches and persists the new
/// non-degraded results.
pub async fn score_sentiment(
    store: &dyn Store,
    scorer: &SentimentScorer,
    mut state: RunState,
) -> Result<RunState, PipelineError> {
    let fail = |e: anyhow::Error| PipelineError::stage(Stage::Sentiment, e);

    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    let mut reused = 0usize;
    for article in state.articles.values().flatten() {
        let fingerprint = article.fingerprint();
        if !seen.insert(fingerprint.clone()) {
            continue;
        }
        match store.find_sentiment(&fingerprint).await.map_err(fail)? {
            Some(existing) => {
                state.sentiments.insert(fingerprint, existing);
                reused += 1;
            }
            None => pending.push(article.clone()),
        }
    }

    let scored = scorer.score(&pending).await;
    let degraded = scored.iter().filter(|r| r.degraded).count();
    let persisted = store
        .insert_sentiment_results(&scored, scorer.model_version())
        .await
        .context("failed to persist sentiment results")
        .map_err(fail)?;

    tracing::info!(
        run_id = %state.run_id,
        reused,
        scored = scored.len(),
        degraded,
        persisted,
        "sentiment scoring finished"
    );
    for result in scored {
        state.sentiments.insert(result.fingerprint.clone(), result);
    }
    Ok(state)
}

pub fn aggregate(cfg: &PipelineConfig, mut state: RunState) -> Result<RunState, PipelineError> {
    for ticker in state.portfolio.tickers() {
        let articles = state.articles.get(&ticker).map(Vec::as_slice).unwrap_or_default();
        let score = aggregate_ticker(articles, &state.sentiments, state.started_at, &cfg.aggregation)
            .map_err(|e| PipelineError::stage(Stage::Aggregate, e))?;
        tracing::debug!(
            run_id = %state.run_id,
            %ticker,
            score = score.score,
            avg_confidence = score.avg_confidence,
            "ticker aggregated"
        );
        state.ticker_scores.insert(ticker, score);
    }
    Ok(state)
}

pub async fn summarize(fan_out: &SummaryFanOut, mut state: RunState) -> Result<RunState, PipelineError> {
    state.summaries = fan_out.summarize_all(&state.articles, &state.sentiments).await;
    Ok(state)
}

/// Computes tiers and the signal, then overwrites the day's snapshot rows.
pub async fn assess_risk(
    store: &dyn Store,
    cfg: &PipelineConfig,
    mut state: RunState,
) -> Result<RunState, PipelineError> {
    let weights = state.portfolio.weights();
    let assessment = risk::assess(&weights, &state.ticker_scores, &cfg.risk);

    let aggregates: Vec<TickerAggregate> = weights
        .keys()
        .map(|ticker| {
            let score = state
                .ticker_scores
                .get(ticker)
                .copied()
                .unwrap_or(TickerScore::NEUTRAL);
            TickerAggregate {
                ticker: ticker.clone(),
                sentiment_score: score.score,
                avg_confidence: score.avg_confidence,
                article_count: state.articles.get(ticker).map_or(0, Vec::len),
                risk_tier: assessment
                    .ticker_risks
                    .get(ticker)
                    .copied()
                    .unwrap_or(RiskTier::Low),
            }
        })
        .collect();

    store
        .upsert_ticker_aggregates(state.user.id, state.report_date, &aggregates)
        .await
        .context("failed to store daily ticker snapshot")
        .map_err(|e| PipelineError::stage(Stage::Risk, e))?;

    tracing::info!(
        run_id = %state.run_id,
        portfolio_sentiment = assessment.portfolio_sentiment,
        risk_score = assessment.risk_score,
        risk_tier = assessment.risk_tier.as_str(),
        signal = assessment.signal.as_str(),
        "risk assessed"
    );
    state.aggregates = aggregates;
    state.assessment = Some(assessment);
    Ok(state)
}

pub fn build_report(state: &RunState) -> anyhow::Result<ReportPayload> {
    let assessment = state
        .assessment
        .as_ref()
        .context("risk assessment missing from run state")?;

    let tickers = state
        .portfolio
        .holdings()
        .iter()
        .map(|h| {
            let aggregate = state.aggregates.iter().find(|a| a.ticker == h.ticker);
            let articles = state.articles.get(&h.ticker).map(Vec::as_slice).unwrap_or_default();
            TickerReport {
                ticker: h.ticker.clone(),
                weight: h.weight,
                sentiment_score: aggregate.map_or(0.0, |a| a.sentiment_score),
                avg_confidence: aggregate.map_or(0.0, |a| a.avg_confidence),
                article_count: articles.len(),
                risk_tier: aggregate.map_or(RiskTier::Low, |a| a.risk_tier),
                summary: state.summaries.get(&h.ticker).cloned().unwrap_or_default(),
                headlines: articles
                    .iter()
                    .take(HEADLINES_PER_TICKER)
                    .map(|a| Headline {
                        title: a.headline.clone(),
                        url: a.url.clone(),
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(ReportPayload {
        report_date: state.report_date,
        portfolio_sentiment: assessment.portfolio_sentiment,
        risk_tier: assessment.risk_tier,
        signal: assessment.signal,
        reason: assessment.reason.clone(),
        tickers,
    })
}

/// A delivery failure is reported through `delivered`, never as a stage error.
pub async fn deliver(
    store: &dyn Store,
    channel: &dyn DeliveryChannel,
    mut state: RunState,
) -> Result<RunState, PipelineError> {
    let report = build_report(&state).map_err(|e| PipelineError::stage(Stage::Deliver, e))?;

    let outcome = channel.deliver(&state.user.email, &report).await;
    let error_message = match &outcome {
        Ok(()) => {
            tracing::info!(run_id = %state.run_id, channel = channel.name(), "report delivered");
            None
        }
        Err(err) => {
            let msg = format!("{err:#}");
            tracing::error!(
                run_id = %state.run_id,
                channel = channel.name(),
                error = %msg,
                "report delivery failed"
            );
            Some(msg)
        }
    };
    state.delivered = outcome.is_ok();

    if let Err(err) = store
        .record_delivery(state.user.id, state.run_id, state.delivered, error_message.as_deref())
        .await
    {
        tracing::warn!(run_id = %state.run_id, error = %format!("{err:#}"), "failed to record delivery");
    }
    Ok(state)
}
