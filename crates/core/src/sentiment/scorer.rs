use crate::config::SentimentConfig;
use crate::domain::{Article, SentimentResult};
use crate::sentiment::model::SentimentModel;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Batches article text through a [`SentimentModel`] and turns class
/// probabilities into signed results. A failed batch degrades to neutral
/// placeholders instead of failing the caller.
#[derive(Clone)]
pub struct SentimentScorer {
    model: Arc<dyn SentimentModel>,
    cfg: SentimentConfig,
}

impl SentimentScorer {
    pub fn new(model: Arc<dyn SentimentModel>, cfg: SentimentConfig) -> Self {
        Self { model, cfg }
    }

    pub fn model_version(&self) -> &str {
        &self.cfg.model_version
    }

    /// Returns one result per distinct fingerprint, in first-seen order.
    /// Batches run sequentially.
    pub async fn score(&self, articles: &[Article]) -> Vec<SentimentResult> {
        let mut seen = HashSet::with_capacity(articles.len());
        let unique: Vec<&Article> = articles
            .iter()
            .filter(|a| seen.insert(a.fingerprint()))
            .collect();

        let mut out = Vec::with_capacity(unique.len());
        for (batch_idx, batch) in unique.chunks(self.cfg.batch_size.max(1)).enumerate() {
            let started = Instant::now();
            let texts: Vec<String> = batch
                .iter()
                .map(|a| a.scoring_text(self.cfg.text_body_chars))
                .collect();

            match self.model.predict(&texts).await {
                Ok(probs) if probs.len() == batch.len() => {
                    for (article, p) in batch.iter().zip(probs.iter()) {
                        let fingerprint = article.fingerprint();
                        match p.validate() {
                            Ok(()) => out.push(SentimentResult::from_probabilities(
                                fingerprint,
                                article.id,
                                p,
                                &self.cfg,
                            )),
                            Err(err) => {
                                tracing::warn!(
                                    ticker = %article.ticker,
                                    %fingerprint,
                                    error = %err,
                                    "invalid model output; using neutral placeholder"
                                );
                                out.push(SentimentResult::degraded(fingerprint, article.id));
                            }
                        }
                    }
                    tracing::debug!(
                        batch = batch_idx,
                        size = batch.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "scored batch"
                    );
                }
                Ok(probs) => {
                    tracing::error!(
                        batch = batch_idx,
                        expected = batch.len(),
                        got = probs.len(),
                        "sentiment model returned wrong number of predictions; degrading batch"
                    );
                    out.extend(degrade(batch));
                }
                Err(err) => {
                    tracing::error!(
                        batch = batch_idx,
                        size = batch.len(),
                        error = %format!("{err:#}"),
                        "sentiment batch failed; degrading batch"
                    );
                    out.extend(degrade(batch));
                }
            }
        }
        out
    }
}

fn degrade(batch: &[&Article]) -> Vec<SentimentResult> {
    batch
        .iter()
        .map(|article| {
            let fingerprint = article.fingerprint();
            tracing::warn!(
                ticker = %article.ticker,
                %fingerprint,
                "article scored as degraded neutral"
            );
            SentimentResult::degraded(fingerprint, article.id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::{ClassProbabilities, SentimentLabel};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Returns fixed probabilities; fails the batches whose index is listed.
    struct FakeModel {
        fail_batches: Vec<usize>,
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl FakeModel {
        fn new(fail_batches: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                fail_batches,
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl SentimentModel for FakeModel {
        async fn predict(&self, texts: &[String]) -> anyhow::Result<Vec<ClassProbabilities>> {
            let idx = {
                let mut batches = self.batches.lock().unwrap();
                batches.push(texts.to_vec());
                batches.len() - 1
            };
            if self.fail_batches.contains(&idx) {
                anyhow::bail!("model exploded");
            }
            Ok(texts
                .iter()
                .map(|_| ClassProbabilities {
                    positive: 0.9,
                    negative: 0.05,
                    neutral: 0.05,
                })
                .collect())
        }
    }

    fn article(n: usize) -> Article {
        Article {
            id: Some(n as i64),
            ticker: "AAPL".to_string(),
            headline: format!("Headline {n}"),
            body: "b".repeat(800),
            source: "Reuters".to_string(),
            url: format!("https://news.example/{n}"),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    fn scorer(model: Arc<FakeModel>) -> SentimentScorer {
        SentimentScorer::new(model, PipelineConfig::default().sentiment)
    }

    #[tokio::test]
    async fn batches_by_configured_size_and_truncates_text() {
        let model = FakeModel::new(vec![]);
        let articles: Vec<Article> = (0..10).map(article).collect();
        let results = scorer(model.clone()).score(&articles).await;

        assert_eq!(results.len(), 10);
        let batches = model.batches.lock().unwrap();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![8, 2]);
        // headline + space + 500 body chars
        assert_eq!(batches[0][0].chars().count(), "Headline 0".len() + 1 + 500);
        assert!(results.iter().all(|r| r.label == SentimentLabel::Positive && !r.degraded));
        assert!((results[0].score - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failed_batch_degrades_only_its_articles() {
        let model = FakeModel::new(vec![0]);
        let articles: Vec<Article> = (0..10).map(article).collect();
        let results = scorer(model).score(&articles).await;

        assert_eq!(results.len(), 10);
        for r in &results[..8] {
            assert!(r.degraded);
            assert_eq!(r.label, SentimentLabel::Neutral);
            assert_eq!(r.confidence, 0.5);
            assert_eq!(r.score, 0.0);
        }
        assert!(results[8..].iter().all(|r| !r.degraded));
    }

    #[tokio::test]
    async fn duplicate_articles_are_scored_once() {
        let model = FakeModel::new(vec![]);
        let articles = vec![article(1), article(1), article(2)];
        let results = scorer(model.clone()).score(&articles).await;
        assert_eq!(results.len(), 2);
        assert_eq!(model.batches.lock().unwrap()[0].len(), 2);
    }
}
