use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A news article as it flows through a run. Provider payloads, stored rows
/// and scoring inputs all use this one shape; `id` is set once the article
/// has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub id: Option<i64>,
    pub ticker: String,
    pub headline: String,
    pub body: String,
    pub source: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

/// Article identity: sha256 over headline followed by source, hex encoded.
/// Body and url are deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(headline: &str, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(headline.as_bytes());
        hasher.update(source.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Article {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.headline, &self.source)
    }

    /// Headline plus the leading part of the body, as sent to the model.
    pub fn scoring_text(&self, body_chars: usize) -> String {
        format!("{} {}", self.headline, truncate_chars(&self.body, body_chars))
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.published_at).num_seconds() as f64 / 3600.0
    }
}

/// Cuts `s` to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(headline: &str, source: &str, url: &str, body: &str) -> Article {
        Article {
            id: None,
            ticker: "AAPL".to_string(),
            headline: headline.to_string(),
            body: body.to_string(),
            source: source.to_string(),
            url: url.to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn fingerprint_ignores_body_and_url() {
        let a = article("Apple beats", "Reuters", "https://a.example/1", "one body");
        let b = article("Apple beats", "Reuters", "https://b.example/2", "other body");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);
    }

    #[test]
    fn fingerprint_depends_on_source() {
        let a = article("Apple beats", "Reuters", "u", "b");
        let b = article("Apple beats", "CNBC", "u", "b");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn scoring_text_caps_body() {
        let a = article("Head", "Reuters", "u", &"x".repeat(900));
        let text = a.scoring_text(500);
        assert_eq!(text.len(), "Head ".len() + 500);
    }
}
