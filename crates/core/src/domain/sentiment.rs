use crate::config::SentimentConfig;
use crate::domain::article::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(SentimentLabel::Positive),
            "neutral" => Ok(SentimentLabel::Neutral),
            "negative" => Ok(SentimentLabel::Negative),
            other => anyhow::bail!("unknown sentiment label: {other}"),
        }
    }
}

/// Class probabilities returned by the sentiment model for one text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl ClassProbabilities {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, p) in [
            ("positive", self.positive),
            ("negative", self.negative),
            ("neutral", self.neutral),
        ] {
            anyhow::ensure!(
                p.is_finite() && (0.0..=1.0).contains(&p),
                "{name} probability out of range: {p}"
            );
        }
        Ok(())
    }

    /// Highest-probability class. Ties go to neutral, then positive.
    pub fn top(&self) -> (SentimentLabel, f64) {
        let mut best = (SentimentLabel::Neutral, self.neutral);
        for candidate in [
            (SentimentLabel::Positive, self.positive),
            (SentimentLabel::Negative, self.negative),
        ] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub fingerprint: Fingerprint,
    pub article_id: Option<i64>,
    pub label: SentimentLabel,
    pub confidence: f64,
    pub score: f64,
    /// Set for placeholder results produced when the model call failed.
    #[serde(default)]
    pub degraded: bool,
}

impl SentimentResult {
    /// Label is the top class, confidence its probability; the signed score
    /// follows the configured policy rather than any raw model output.
    pub fn from_probabilities(
        fingerprint: Fingerprint,
        article_id: Option<i64>,
        probs: &ClassProbabilities,
        cfg: &SentimentConfig,
    ) -> Self {
        let (label, confidence) = probs.top();
        let confidence = confidence.clamp(0.0, 1.0);
        let score = match label {
            SentimentLabel::Positive => 0.5 + 0.5 * confidence,
            SentimentLabel::Negative => -0.5 - 0.5 * confidence,
            SentimentLabel::Neutral => neutral_lean(probs, cfg),
        };

        Self {
            fingerprint,
            article_id,
            label,
            confidence,
            score: score.clamp(-1.0, 1.0),
            degraded: false,
        }
    }

    pub fn degraded(fingerprint: Fingerprint, article_id: Option<i64>) -> Self {
        Self {
            fingerprint,
            article_id,
            label: SentimentLabel::Neutral,
            confidence: 0.5,
            score: 0.0,
            degraded: true,
        }
    }
}

fn neutral_lean(probs: &ClassProbabilities, cfg: &SentimentConfig) -> f64 {
    if probs.positive > probs.negative + cfg.neutral_lean_margin {
        cfg.neutral_lean_factor * probs.positive
    } else if probs.negative > probs.positive + cfg.neutral_lean_margin {
        -cfg.neutral_lean_factor * probs.negative
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn fp() -> Fingerprint {
        Fingerprint::of("headline", "source")
    }

    fn score(positive: f64, negative: f64, neutral: f64) -> SentimentResult {
        let cfg = PipelineConfig::default().sentiment;
        let probs = ClassProbabilities {
            positive,
            negative,
            neutral,
        };
        SentimentResult::from_probabilities(fp(), None, &probs, &cfg)
    }

    #[test]
    fn positive_maps_into_upper_band() {
        let r = score(0.9, 0.05, 0.05);
        assert_eq!(r.label, SentimentLabel::Positive);
        assert!((r.confidence - 0.9).abs() < 1e-12);
        assert!((r.score - 0.95).abs() < 1e-12);
    }

    #[test]
    fn negative_maps_into_lower_band() {
        let r = score(0.1, 0.8, 0.1);
        assert_eq!(r.label, SentimentLabel::Negative);
        assert!((r.score + 0.9).abs() < 1e-12);
    }

    #[test]
    fn neutral_leans_toward_dominant_side() {
        let r = score(0.35, 0.05, 0.6);
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert!((r.score - 0.105).abs() < 1e-12);

        let r = score(0.05, 0.35, 0.6);
        assert!((r.score + 0.105).abs() < 1e-12);
    }

    #[test]
    fn neutral_without_clear_lean_is_exactly_zero() {
        let r = score(0.2, 0.15, 0.65);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn ties_prefer_neutral() {
        let r = score(0.4, 0.2, 0.4);
        assert_eq!(r.label, SentimentLabel::Neutral);
    }

    #[test]
    fn label_and_score_sign_stay_consistent() {
        let steps = [0.0, 0.05, 0.1, 0.2, 0.33, 0.45, 0.5, 0.7, 0.9, 1.0];
        for &p in &steps {
            for &n in &steps {
                if p + n > 1.0 {
                    continue;
                }
                let r = score(p, n, 1.0 - p - n);
                assert!((-1.0..=1.0).contains(&r.score));
                assert!((0.0..=1.0).contains(&r.confidence));
                match r.label {
                    SentimentLabel::Positive => assert!(r.score > 0.0),
                    SentimentLabel::Negative => assert!(r.score < 0.0),
                    SentimentLabel::Neutral => assert!(r.score.abs() <= 0.3),
                }
            }
        }
    }

    #[test]
    fn degraded_result_is_neutral_half_confidence() {
        let r = SentimentResult::degraded(fp(), Some(3));
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.confidence, 0.5);
        assert_eq!(r.score, 0.0);
        assert!(r.degraded);
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("Positive".parse::<SentimentLabel>().unwrap(), SentimentLabel::Positive);
        assert!("bullish".parse::<SentimentLabel>().is_err());
    }
}
