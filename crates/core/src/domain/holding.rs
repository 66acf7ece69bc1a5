use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Allowed deviation of the raw weight sum from 1.0 before it is reported.
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub weight: f64,
}

/// A validated set of holdings whose weights sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    holdings: Vec<Holding>,
    /// Weight sum as stored, before normalization.
    raw_weight_sum: f64,
}

impl Portfolio {
    pub fn from_holdings(user_id: i64, holdings: Vec<Holding>) -> Result<Self, PipelineError> {
        let invalid = |reason: String| PipelineError::InvalidPortfolio { user_id, reason };

        if holdings.is_empty() {
            return Err(invalid("portfolio has no holdings".to_string()));
        }

        let mut seen = BTreeSet::new();
        let mut cleaned = Vec::with_capacity(holdings.len());
        for h in holdings {
            let ticker = h.ticker.trim().to_ascii_uppercase();
            if ticker.is_empty() {
                return Err(invalid("ticker must be non-empty".to_string()));
            }
            if !h.weight.is_finite() || !(0.0..=1.0).contains(&h.weight) {
                return Err(invalid(format!(
                    "weight for {ticker} must be within [0, 1] (got {})",
                    h.weight
                )));
            }
            if !seen.insert(ticker.clone()) {
                return Err(invalid(format!("duplicate ticker {ticker}")));
            }
            cleaned.push(Holding {
                ticker,
                weight: h.weight,
            });
        }

        let raw_weight_sum: f64 = cleaned.iter().map(|h| h.weight).sum();
        if raw_weight_sum <= 0.0 {
            return Err(invalid("weights sum to zero".to_string()));
        }

        Ok(Self {
            holdings: cleaned,
            raw_weight_sum,
        })
    }

    /// Rescales weights so they sum to exactly 1.0. Returns the raw sum when it
    /// was outside the tolerance, so the caller can report it.
    pub fn normalize(&mut self) -> Option<f64> {
        let sum = self.raw_weight_sum;
        for h in &mut self.holdings {
            h.weight /= sum;
        }
        self.raw_weight_sum = 1.0;
        ((sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE).then_some(sum)
    }

    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    pub fn tickers(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.ticker.clone()).collect()
    }

    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.holdings
            .iter()
            .map(|h| (h.ticker.clone(), h.weight))
            .collect()
    }

    pub fn weight_sum(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }
}
