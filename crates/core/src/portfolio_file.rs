//! Bulk user and portfolio loading from a JSON file:
//!
//! ```json
//! {"users": [{"email": "a@example.com", "portfolio": {"AAPL": 0.6, "MSFT": 0.4}}]}
//! ```

use crate::domain::Holding;
use crate::storage::Store;
use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PortfolioFile {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub portfolio: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub users: usize,
    pub portfolios: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PortfolioFile {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let file: Self = serde_json::from_str(text).context("invalid portfolio file")?;
        anyhow::ensure!(!file.users.is_empty(), "no users found in portfolio file");
        Ok(file)
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to load {}", path.display()))
    }
}

/// Creates or reuses each user and replaces their holdings. A bad entry is
/// logged and counted; the remaining entries still load.
pub async fn load_portfolios(store: &dyn Store, file: &PortfolioFile) -> LoadSummary {
    let mut summary = LoadSummary::default();
    for entry in &file.users {
        let Some(email) = entry.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            tracing::warn!("skipping portfolio entry with no email");
            summary.skipped += 1;
            continue;
        };

        let user = match store.create_user(email).await {
            Ok(user) => user,
            Err(err) => {
                tracing::error!(email, error = %format!("{err:#}"), "failed to create user");
                summary.failed += 1;
                continue;
            }
        };
        summary.users += 1;

        if entry.portfolio.is_empty() {
            tracing::warn!(email, user_id = user.id, "no portfolio given; holdings unchanged");
            continue;
        }
        let holdings: Vec<Holding> = entry
            .portfolio
            .iter()
            .map(|(ticker, weight)| Holding {
                ticker: ticker.clone(),
                weight: *weight,
            })
            .collect();
        match store.set_holdings(user.id, holdings).await {
            Ok(portfolio) => {
                tracing::info!(
                    email,
                    user_id = user.id,
                    tickers = portfolio.holdings().len(),
                    "portfolio loaded"
                );
                summary.portfolios += 1;
            }
            Err(err) => {
                tracing::error!(email, user_id = user.id, error = %format!("{err:#}"), "failed to store portfolio");
                summary.failed += 1;
            }
        }
    }
    summary
}
