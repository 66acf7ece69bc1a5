use crate::config::RiskConfig;
use crate::domain::{PortfolioAssessment, RiskTier};
use crate::sentiment::{aggregate_portfolio, TickerScore};
use std::collections::BTreeMap;

/// Confidence assumed for a held ticker that has no aggregate at all.
pub const MISSING_CONFIDENCE: f64 = 0.5;

/// |sentiment| × weight × (base + confidence).
pub fn risk_score(sentiment: f64, weight: f64, confidence: f64, cfg: &RiskConfig) -> f64 {
    sentiment.abs() * weight * (cfg.confidence_base + confidence)
}

/// Buckets a risk score. Scores below `threshold_low` are low and scores at
/// or above `threshold_high` are high; everything between is medium.
pub fn tier_for(score: f64, cfg: &RiskConfig) -> RiskTier {
    if score < cfg.threshold_low {
        RiskTier::Low
    } else if score < cfg.threshold_high {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

/// Per-ticker tiers plus the portfolio tier, signal and reason. The
/// portfolio tier buckets the raw sum of per-ticker risk scores.
pub fn assess(
    weights: &BTreeMap<String, f64>,
    ticker_scores: &BTreeMap<String, TickerScore>,
    cfg: &RiskConfig,
) -> PortfolioAssessment {
    let mut ticker_risks = BTreeMap::new();
    let mut total = 0.0;
    for (ticker, weight) in weights {
        let (sentiment, confidence) = ticker_scores
            .get(ticker)
            .map(|s| (s.score, s.avg_confidence))
            .unwrap_or((0.0, MISSING_CONFIDENCE));
        let score = risk_score(sentiment, *weight, confidence, cfg);
        ticker_risks.insert(ticker.clone(), tier_for(score, cfg));
        total += score;
    }

    let sentiments: BTreeMap<String, f64> = ticker_scores
        .iter()
        .map(|(t, s)| (t.clone(), s.score))
        .collect();
    let risk_tier = tier_for(total, cfg);
    let (signal, reason) = risk_tier.signal();

    PortfolioAssessment {
        portfolio_sentiment: aggregate_portfolio(&sentiments, weights).clamp(-1.0, 1.0),
        risk_score: total,
        risk_tier,
        signal,
        reason: reason.to_string(),
        ticker_risks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::domain::Signal;

    fn cfg() -> RiskConfig {
        PipelineConfig::default().risk
    }

    fn scores(rows: &[(&str, f64, f64)]) -> BTreeMap<String, TickerScore> {
        rows.iter()
            .map(|(t, score, avg_confidence)| {
                (
                    t.to_string(),
                    TickerScore {
                        score: *score,
                        avg_confidence: *avg_confidence,
                    },
                )
            })
            .collect()
    }

    fn weights(rows: &[(&str, f64)]) -> BTreeMap<String, f64> {
        rows.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    #[test]
    fn confident_positive_concentration_is_high_risk() {
        let w = weights(&[("AAPL", 0.6), ("MSFT", 0.4)]);
        let s = scores(&[("AAPL", 0.95, 0.9), ("MSFT", 0.0, 0.0)]);
        let a = assess(&w, &s, &cfg());

        assert!((a.risk_score - 0.95 * 0.6 * 1.4).abs() < 1e-9);
        assert_eq!(a.risk_tier, RiskTier::High);
        assert_eq!(a.signal, Signal::Review);
        assert_eq!(a.ticker_risks["AAPL"], RiskTier::High);
        assert_eq!(a.ticker_risks["MSFT"], RiskTier::Low);
        assert!((a.portfolio_sentiment - 0.57).abs() < 1e-9);
    }

    #[test]
    fn quiet_portfolio_holds() {
        let w = weights(&[("AAPL", 0.5), ("MSFT", 0.5)]);
        let s = scores(&[("AAPL", 0.05, 0.6), ("MSFT", -0.02, 0.6)]);
        let a = assess(&w, &s, &cfg());
        assert_eq!(a.risk_tier, RiskTier::Low);
        assert_eq!(a.signal, Signal::Hold);
        assert_eq!(
            a.reason,
            "Portfolio sentiment is stable with low risk indicators."
        );
    }

    #[test]
    fn moderate_risk_monitors() {
        let w = weights(&[("AAPL", 1.0)]);
        let s = scores(&[("AAPL", -0.3, 0.5)]);
        let a = assess(&w, &s, &cfg());
        assert!((a.risk_score - 0.3).abs() < 1e-9);
        assert_eq!(a.risk_tier, RiskTier::Medium);
        assert_eq!(a.signal, Signal::Monitor);
    }

    #[test]
    fn missing_aggregate_uses_default_confidence() {
        let w = weights(&[("AAPL", 1.0)]);
        let a = assess(&w, &BTreeMap::new(), &cfg());
        assert_eq!(a.risk_score, 0.0);
        assert_eq!(a.risk_tier, RiskTier::Low);
    }

    #[test]
    fn tiers_are_monotonic_in_sentiment_magnitude() {
        let c = cfg();
        for &(weight, confidence) in &[(0.1, 0.0), (0.4, 0.5), (1.0, 1.0), (0.7, 0.3)] {
            let mut prev = RiskTier::Low;
            for step in 0..=100 {
                let magnitude = step as f64 / 100.0;
                for sign in [1.0, -1.0] {
                    let tier = tier_for(risk_score(sign * magnitude, weight, confidence, &c), &c);
                    assert!(tier >= prev, "tier dropped at |s|={magnitude}");
                }
                prev = tier_for(risk_score(magnitude, weight, confidence, &c), &c);
            }
        }
    }

    #[test]
    fn threshold_boundaries() {
        let c = cfg();
        assert_eq!(tier_for(0.0999, &c), RiskTier::Low);
        assert_eq!(tier_for(0.10, &c), RiskTier::Medium);
        assert_eq!(tier_for(0.5999, &c), RiskTier::Medium);
        assert_eq!(tier_for(0.60, &c), RiskTier::High);
    }
}
