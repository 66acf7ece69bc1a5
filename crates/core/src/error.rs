use std::time::Duration;
use thiserror::Error;

/// Caller-facing failures of a pipeline run.
///
/// `NotFound` and `InvalidPortfolio` are raised before any run record exists.
/// Everything else is recorded on the run record before it is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("user {0} not found")]
    NotFound(i64),

    #[error("invalid portfolio for user {user_id}: {reason}")]
    InvalidPortfolio { user_id: i64, reason: String },

    #[error("pipeline run exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("stage {stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn stage(stage: Stage, source: anyhow::Error) -> Self {
        Self::Stage { stage, source }
    }

    /// Input errors are surfaced before a run record is created.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidPortfolio { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    News,
    Sentiment,
    Aggregate,
    Summarize,
    Risk,
    Deliver,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::News => "news",
            Stage::Sentiment => "sentiment",
            Stage::Aggregate => "aggregate",
            Stage::Summarize => "summarize",
            Stage::Risk => "risk",
            Stage::Deliver => "deliver",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_not_stage_errors() {
        let invalid = PipelineError::InvalidPortfolio {
            user_id: 7,
            reason: "portfolio has no holdings".to_string(),
        };
        assert!(invalid.is_input_error());
        assert!(PipelineError::NotFound(7).is_input_error());

        let stage = PipelineError::stage(Stage::News, anyhow::anyhow!("db down"));
        assert!(!stage.is_input_error());
        assert_eq!(stage.to_string(), "stage news failed: db down");
    }
}
