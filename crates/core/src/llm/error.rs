use crate::llm::Provider;

/// Generation failure carrying the raw exchange for later inspection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider} summary failed at {stage}: {detail}")]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
}

impl LlmDiagnosticsError {
    pub fn new(
        provider: Provider,
        stage: &'static str,
        detail: impl Into<String>,
        raw_output: Option<String>,
    ) -> Self {
        Self {
            provider,
            stage,
            detail: detail.into(),
            raw_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_provider_and_stage() {
        let err = LlmDiagnosticsError::new(Provider::OpenRouter, "http", "status=429", None);
        assert_eq!(err.to_string(), "openrouter summary failed at http: status=429");
    }
}
