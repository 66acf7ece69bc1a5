use crate::config::Settings;
use crate::domain::{RiskTier, Signal};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

pub mod smtp;

pub use smtp::SmtpChannel;

/// Headlines listed per ticker in a report.
pub const HEADLINES_PER_TICKER: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerReport {
    pub ticker: String,
    pub weight: f64,
    pub sentiment_score: f64,
    pub avg_confidence: f64,
    pub article_count: usize,
    pub risk_tier: RiskTier,
    pub summary: String,
    pub headlines: Vec<Headline>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headline {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub report_date: NaiveDate,
    pub portfolio_sentiment: f64,
    pub risk_tier: RiskTier,
    pub signal: Signal,
    pub reason: String,
    pub tickers: Vec<TickerReport>,
}

/// Human-readable bucket for a signed sentiment score.
pub fn sentiment_label(score: f64) -> &'static str {
    if score >= 0.3 {
        "Very Positive"
    } else if score >= 0.1 {
        "Positive"
    } else if score >= 0.02 {
        "Slightly Positive"
    } else if score <= -0.3 {
        "Very Negative"
    } else if score <= -0.1 {
        "Negative"
    } else if score <= -0.02 {
        "Slightly Negative"
    } else {
        "Neutral"
    }
}

impl ReportPayload {
    pub fn subject(&self) -> String {
        format!("Portfolio Sentiment Report - {}", self.report_date)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Portfolio Sentiment Report");
        let _ = writeln!(out, "Date: {}", self.report_date);
        let _ = writeln!(
            out,
            "Portfolio Sentiment: {} ({:+.2})",
            sentiment_label(self.portfolio_sentiment),
            self.portfolio_sentiment
        );
        let _ = writeln!(
            out,
            "Portfolio Risk Level: {}",
            self.risk_tier.as_str().to_ascii_uppercase()
        );
        let _ = writeln!(out, "Signal: {} - {}", self.signal.as_str().to_ascii_uppercase(), self.reason);

        for t in &self.tickers {
            let _ = writeln!(out);
            let _ = writeln!(out, "{} (weight {:.1}%)", t.ticker, t.weight * 100.0);
            let _ = writeln!(
                out,
                "  Sentiment: {} ({:+.2}, confidence {:.2}, {} articles)",
                sentiment_label(t.sentiment_score),
                t.sentiment_score,
                t.avg_confidence,
                t.article_count
            );
            let _ = writeln!(out, "  Risk: {}", t.risk_tier.as_str().to_ascii_uppercase());
            let _ = writeln!(out, "  Summary: {}", t.summary);
            for h in t.headlines.iter().take(HEADLINES_PER_TICKER) {
                let _ = writeln!(out, "  - {}: {}", h.title, h.url);
            }
        }

        out.push_str("\n---\nThis is an automated portfolio sentiment report.\n");
        out
    }
}

/// Outbound report transport.
#[async_trait::async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, recipient: &str, report: &ReportPayload) -> anyhow::Result<()>;
}

/// Writes the rendered report to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait::async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, recipient: &str, report: &ReportPayload) -> anyhow::Result<()> {
        tracing::info!(
            recipient,
            subject = %report.subject(),
            body = %report.render_text(),
            "report delivered to log"
        );
        Ok(())
    }
}

/// SMTP when `SMTP_HOST` is set, otherwise the log channel.
pub fn channel_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn DeliveryChannel>> {
    if settings.smtp_host.is_some() {
        Ok(Arc::new(SmtpChannel::from_settings(settings)?))
    } else {
        tracing::warn!("SMTP_HOST not set; reports will only be logged");
        Ok(Arc::new(LogChannel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_thresholds_are_symmetric() {
        assert_eq!(sentiment_label(0.57), "Very Positive");
        assert_eq!(sentiment_label(0.1), "Positive");
        assert_eq!(sentiment_label(0.05), "Slightly Positive");
        assert_eq!(sentiment_label(0.0), "Neutral");
        assert_eq!(sentiment_label(-0.019), "Neutral");
        assert_eq!(sentiment_label(-0.02), "Slightly Negative");
        assert_eq!(sentiment_label(-0.15), "Negative");
        assert_eq!(sentiment_label(-0.3), "Very Negative");
    }

    #[test]
    fn render_lists_at_most_three_headlines() {
        let report = ReportPayload {
            report_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            portfolio_sentiment: 0.57,
            risk_tier: RiskTier::High,
            signal: Signal::Review,
            reason: "High risk detected.".to_string(),
            tickers: vec![TickerReport {
                ticker: "AAPL".to_string(),
                weight: 0.6,
                sentiment_score: 0.95,
                avg_confidence: 0.9,
                article_count: 4,
                risk_tier: RiskTier::High,
                summary: "Apple beat estimates.".to_string(),
                headlines: (1..=4)
                    .map(|n| Headline {
                        title: format!("Headline {n}"),
                        url: format!("https://news.example/{n}"),
                    })
                    .collect(),
            }],
        };
        let text = report.render_text();

        assert!(text.contains("Portfolio Risk Level: HIGH"));
        assert!(text.contains("AAPL (weight 60.0%)"));
        assert!(text.contains("Very Positive (+0.95"));
        assert!(text.contains("Headline 3"));
        assert!(!text.contains("Headline 4"));
        assert_eq!(report.subject(), "Portfolio Sentiment Report - 2026-03-02");
    }
}
