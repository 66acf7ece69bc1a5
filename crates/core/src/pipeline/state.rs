use crate::domain::{
    Article, Fingerprint, Portfolio, PortfolioAssessment, SentimentResult, TickerAggregate, User,
};
use crate::sentiment::TickerScore;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Everything one run knows. Each stage takes the state by value, fills in
/// its own output fields and hands it back.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: Uuid,
    pub user: User,
    pub portfolio: Portfolio,
    pub report_date: NaiveDate,
    pub started_at: DateTime<Utc>,

    /// news: stored articles per held ticker; tickers without news map to an
    /// empty list.
    pub articles: BTreeMap<String, Vec<Article>>,
    /// sentiment: one result per distinct article fingerprint.
    pub sentiments: HashMap<Fingerprint, SentimentResult>,
    /// aggregate
    pub ticker_scores: BTreeMap<String, TickerScore>,
    /// summarize
    pub summaries: BTreeMap<String, String>,
    /// risk
    pub assessment: Option<PortfolioAssessment>,
    pub aggregates: Vec<TickerAggregate>,
    /// deliver
    pub delivered: bool,
}

impl RunState {
    pub fn new(
        run_id: Uuid,
        user: User,
        portfolio: Portfolio,
        report_date: NaiveDate,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            user,
            portfolio,
            report_date,
            started_at,
            articles: BTreeMap::new(),
            sentiments: HashMap::new(),
            ticker_scores: BTreeMap::new(),
            summaries: BTreeMap::new(),
            assessment: None,
            aggregates: Vec::new(),
            delivered: false,
        }
    }

    pub fn article_count(&self) -> usize {
        self.articles.values().map(Vec::len).sum()
    }
}
