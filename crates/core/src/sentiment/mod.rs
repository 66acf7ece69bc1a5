pub mod aggregate;
pub mod model;
pub mod scorer;

pub use aggregate::{aggregate_portfolio, aggregate_ticker, TickerScore};
pub use model::{HttpSentimentModel, SentimentModel};
pub use scorer::SentimentScorer;
