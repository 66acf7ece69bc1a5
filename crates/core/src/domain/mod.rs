pub mod article;
pub mod holding;
pub mod report;
pub mod run;
pub mod sentiment;

pub use article::{Article, Fingerprint};
pub use holding::{Holding, Portfolio, User};
pub use report::{PortfolioAssessment, RiskTier, Signal, TickerAggregate};
pub use run::{PipelineRun, RunStatus};
pub use sentiment::{ClassProbabilities, SentimentLabel, SentimentResult};
