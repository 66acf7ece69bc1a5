use crate::config::AggregationConfig;
use crate::domain::{Article, Fingerprint, SentimentResult};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerScore {
    pub score: f64,
    pub avg_confidence: f64,
}

impl TickerScore {
    pub const NEUTRAL: TickerScore = TickerScore {
        score: 0.0,
        avg_confidence: 0.0,
    };
}

/// Step function over article age. Articles older than the last step weigh 0.
pub fn recency_weight(age_hours: f64, cfg: &AggregationConfig) -> f64 {
    cfg.recency_steps
        .iter()
        .find(|(max_age, _)| age_hours <= *max_age)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

/// Case-insensitive substring lookup against the known-outlet table.
pub fn credibility_weight(source: &str, cfg: &AggregationConfig) -> f64 {
    let source = source.to_lowercase();
    cfg.source_weights
        .iter()
        .find(|(name, _)| source.contains(name.as_str()))
        .map(|(_, w)| *w)
        .unwrap_or(cfg.default_source_weight)
}

/// Weighted mean of article scores, weight = recency × credibility ×
/// confidence. `avg_confidence` is the plain mean over articles inside the
/// recency window. Both are 0.0 when nothing qualifies.
///
/// Every article must have a result in `sentiments`; a missing one is an
/// error rather than a silent skip.
pub fn aggregate_ticker(
    articles: &[Article],
    sentiments: &HashMap<Fingerprint, SentimentResult>,
    now: DateTime<Utc>,
    cfg: &AggregationConfig,
) -> anyhow::Result<TickerScore> {
    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    let mut confidence_sum = 0.0;
    let mut qualifying = 0usize;

    for article in articles {
        let fingerprint = article.fingerprint();
        let sentiment = sentiments.get(&fingerprint).ok_or_else(|| {
            anyhow!(
                "article {fingerprint} for {} has no sentiment result",
                article.ticker
            )
        })?;

        let recency = recency_weight(article.age_hours(now), cfg);
        if recency <= 0.0 {
            tracing::debug!(
                ticker = %article.ticker,
                %fingerprint,
                "stale article excluded from aggregation"
            );
            continue;
        }
        let weight = recency * credibility_weight(&article.source, cfg) * sentiment.confidence;

        weighted_sum += sentiment.score * weight;
        weight_sum += weight;
        confidence_sum += sentiment.confidence;
        qualifying += 1;
    }

    if qualifying == 0 {
        return Ok(TickerScore::NEUTRAL);
    }

    let score = if weight_sum > 0.0 {
        (weighted_sum / weight_sum).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    Ok(TickerScore {
        score,
        avg_confidence: confidence_sum / qualifying as f64,
    })
}

/// Plain weighted sum over tickers; no renormalization.
pub fn aggregate_portfolio(
    ticker_scores: &BTreeMap<String, f64>,
    weights: &BTreeMap<String, f64>,
) -> f64 {
    ticker_scores
        .iter()
        .map(|(ticker, score)| score * weights.get(ticker).copied().unwrap_or(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::SentimentLabel;
    use chrono::{Duration, TimeZone};

    fn cfg() -> AggregationConfig {
        PipelineConfig::default().aggregation
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn article(headline: &str, source: &str, age_hours: i64) -> Article {
        Article {
            id: Some(1),
            ticker: "AAPL".to_string(),
            headline: headline.to_string(),
            body: String::new(),
            source: source.to_string(),
            url: String::new(),
            published_at: now() - Duration::hours(age_hours),
        }
    }

    fn scored(
        articles: &[Article],
        rows: &[(SentimentLabel, f64, f64)],
    ) -> HashMap<Fingerprint, SentimentResult> {
        articles
            .iter()
            .zip(rows)
            .map(|(a, (label, confidence, score))| {
                let fp = a.fingerprint();
                (
                    fp.clone(),
                    SentimentResult {
                        fingerprint: fp,
                        article_id: a.id,
                        label: *label,
                        confidence: *confidence,
                        score: *score,
                        degraded: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn recency_steps() {
        let c = cfg();
        assert_eq!(recency_weight(0.5, &c), 1.0);
        assert_eq!(recency_weight(6.0, &c), 1.0);
        assert_eq!(recency_weight(6.5, &c), 0.8);
        assert_eq!(recency_weight(12.0, &c), 0.8);
        assert_eq!(recency_weight(23.9, &c), 0.6);
        assert_eq!(recency_weight(24.1, &c), 0.0);
    }

    #[test]
    fn credibility_lookup_is_case_insensitive_substring() {
        let c = cfg();
        assert_eq!(credibility_weight("Reuters", &c), 1.0);
        assert_eq!(credibility_weight("Bloomberg News", &c), 0.95);
        assert_eq!(credibility_weight("CNBC.com", &c), 0.85);
        assert_eq!(credibility_weight("Some Blog", &c), 0.6);
    }

    #[test]
    fn single_fresh_reuters_positive() {
        let articles = vec![article("Apple beats", "Reuters", 1)];
        let sentiments = scored(&articles, &[(SentimentLabel::Positive, 0.9, 0.95)]);
        let s = aggregate_ticker(&articles, &sentiments, now(), &cfg()).unwrap();
        assert!((s.score - 0.95).abs() < 1e-9);
        assert!((s.avg_confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn weighted_mean_favours_fresh_credible_articles() {
        let articles = vec![
            article("Up", "Reuters", 1),
            article("Down", "Some Blog", 20),
        ];
        let sentiments = scored(
            &articles,
            &[
                (SentimentLabel::Positive, 0.8, 0.9),
                (SentimentLabel::Negative, 0.8, -0.9),
            ],
        );
        let s = aggregate_ticker(&articles, &sentiments, now(), &cfg()).unwrap();
        // weights: 1.0*1.0*0.8 = 0.8 and 0.6*0.6*0.8 = 0.288
        let expected = (0.9 * 0.8 - 0.9 * 0.288) / (0.8 + 0.288);
        assert!((s.score - expected).abs() < 1e-9);
        assert!((s.avg_confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn only_stale_articles_yield_neutral_zero_confidence() {
        let articles = vec![article("Old", "Reuters", 30), article("Older", "CNBC", 48)];
        let sentiments = scored(
            &articles,
            &[
                (SentimentLabel::Positive, 0.9, 0.95),
                (SentimentLabel::Negative, 0.9, -0.95),
            ],
        );
        let s = aggregate_ticker(&articles, &sentiments, now(), &cfg()).unwrap();
        assert_eq!(s, TickerScore::NEUTRAL);
        assert!(!s.score.is_nan());
    }

    #[test]
    fn zero_confidence_articles_do_not_divide_by_zero() {
        let articles = vec![article("Flat", "Reuters", 1)];
        let sentiments = scored(&articles, &[(SentimentLabel::Neutral, 0.0, 0.0)]);
        let s = aggregate_ticker(&articles, &sentiments, now(), &cfg()).unwrap();
        assert_eq!(s.score, 0.0);
        assert_eq!(s.avg_confidence, 0.0);
    }

    #[test]
    fn empty_article_list_is_neutral() {
        let s = aggregate_ticker(&[], &HashMap::new(), now(), &cfg()).unwrap();
        assert_eq!(s, TickerScore::NEUTRAL);
    }

    #[test]
    fn unscored_article_is_an_error() {
        let articles = vec![article("Missing", "Reuters", 1)];
        assert!(aggregate_ticker(&articles, &HashMap::new(), now(), &cfg()).is_err());
    }

    #[test]
    fn portfolio_is_plain_weighted_sum() {
        let scores = BTreeMap::from([("AAPL".to_string(), 0.95), ("MSFT".to_string(), 0.0)]);
        let weights = BTreeMap::from([("AAPL".to_string(), 0.6), ("MSFT".to_string(), 0.4)]);
        assert!((aggregate_portfolio(&scores, &weights) - 0.57).abs() < 1e-9);
    }
}
