use crate::config::Settings;
use crate::domain::ClassProbabilities;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Batch text classifier returning one probability triple per input text, in
/// input order.
#[async_trait::async_trait]
pub trait SentimentModel: Send + Sync {
    async fn predict(&self, texts: &[String]) -> Result<Vec<ClassProbabilities>>;
}

/// Client for a model server exposing `POST {base}/predict`.
#[derive(Debug, Clone)]
pub struct HttpSentimentModel {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<ClassProbabilities>,
}

impl HttpSentimentModel {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build sentiment model http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout_secs = std::env::var("SENTIMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self::new(
            settings.require_sentiment_service_url()?,
            Duration::from_secs(timeout_secs),
        )
    }

    fn url(&self) -> String {
        format!("{}/predict", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl SentimentModel for HttpSentimentModel {
    async fn predict(&self, texts: &[String]) -> Result<Vec<ClassProbabilities>> {
        let res = self
            .http
            .post(self.url())
            .json(&PredictRequest { texts })
            .send()
            .await
            .context("sentiment model request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read sentiment model response")?;
        if !status.is_success() {
            anyhow::bail!("sentiment model HTTP {status}: {text}");
        }

        let parsed: PredictResponse = serde_json::from_str(&text)
            .with_context(|| format!("sentiment model response is not valid: {text}"))?;
        anyhow::ensure!(
            parsed.predictions.len() == texts.len(),
            "sentiment model returned {} predictions for {} texts",
            parsed.predictions.len(),
            texts.len()
        );
        Ok(parsed.predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_prediction_payload() {
        let v = json!({"predictions": [
            {"positive": 0.9, "negative": 0.05, "neutral": 0.05},
            {"positive": 0.1, "negative": 0.2, "neutral": 0.7}
        ]});
        let parsed: PredictResponse = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.predictions.len(), 2);
        assert_eq!(parsed.predictions[1].neutral, 0.7);
    }

    #[test]
    fn request_body_shape() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(PredictRequest { texts: &texts }).unwrap();
        assert_eq!(body, json!({"texts": ["a", "b"]}));
    }
}
