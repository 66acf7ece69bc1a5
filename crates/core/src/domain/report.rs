use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskTier::Low),
            "medium" => Some(RiskTier::Medium),
            "high" => Some(RiskTier::High),
            _ => None,
        }
    }

    /// Fixed signal and reason for a portfolio tier.
    pub fn signal(&self) -> (Signal, &'static str) {
        match self {
            RiskTier::Low => (
                Signal::Hold,
                "Portfolio sentiment is stable with low risk indicators.",
            ),
            RiskTier::Medium => (
                Signal::Monitor,
                "Portfolio shows moderate sentiment volatility. Monitor closely.",
            ),
            RiskTier::High => (
                Signal::Review,
                "High risk detected. Review portfolio positions and consider adjustments.",
            ),
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Hold,
    Monitor,
    Review,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Hold => "hold",
            Signal::Monitor => "monitor",
            Signal::Review => "review",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily per-ticker snapshot, keyed by (user, date, ticker) when stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerAggregate {
    pub ticker: String,
    pub sentiment_score: f64,
    pub avg_confidence: f64,
    pub article_count: usize,
    pub risk_tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAssessment {
    pub portfolio_sentiment: f64,
    pub risk_score: f64,
    pub risk_tier: RiskTier,
    pub signal: Signal,
    pub reason: String,
    pub ticker_risks: BTreeMap<String, RiskTier>,
}
