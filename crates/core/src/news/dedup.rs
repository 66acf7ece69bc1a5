use crate::domain::Article;
use std::collections::HashSet;

/// Drops later articles whose fingerprint was already seen. Order of the
/// survivors is preserved, so running it on its own output is a no-op.
pub fn dedup_by_fingerprint(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::with_capacity(articles.len());
    let mut out = Vec::with_capacity(articles.len());
    for article in articles {
        let fingerprint = article.fingerprint();
        if seen.insert(fingerprint.clone()) {
            out.push(article);
        } else {
            tracing::debug!(
                ticker = %article.ticker,
                %fingerprint,
                url = %article.url,
                "dropping duplicate article"
            );
        }
    }
    out
}

/// Appends secondary articles whose URL does not already appear in the
/// primary set.
pub fn merge_fallback(mut primary: Vec<Article>, secondary: Vec<Article>) -> Vec<Article> {
    let known: HashSet<String> = primary.iter().map(|a| a.url.clone()).collect();
    for article in secondary {
        if known.contains(&article.url) {
            tracing::debug!(
                ticker = %article.ticker,
                url = %article.url,
                "dropping fallback article already returned by primary"
            );
            continue;
        }
        primary.push(article);
    }
    primary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn article(headline: &str, source: &str, url: &str) -> Article {
        Article {
            id: None,
            ticker: "AAPL".to_string(),
            headline: headline.to_string(),
            body: "body".to_string(),
            source: source.to_string(),
            url: url.to_string(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn same_headline_and_source_collapse_regardless_of_url() {
        let out = dedup_by_fingerprint(vec![
            article("Apple beats", "Reuters", "https://a.example/1"),
            article("Apple beats", "Reuters", "https://b.example/2"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://a.example/1");
    }

    #[test]
    fn different_source_is_a_different_article() {
        let out = dedup_by_fingerprint(vec![
            article("Apple beats", "Reuters", "https://a.example/1"),
            article("Apple beats", "CNBC", "https://a.example/1"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            article("A", "Reuters", "u1"),
            article("B", "Reuters", "u2"),
            article("A", "Reuters", "u3"),
            article("C", "CNBC", "u4"),
            article("B", "Reuters", "u5"),
        ];
        let once = dedup_by_fingerprint(input);
        let twice = dedup_by_fingerprint(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn fallback_merge_skips_known_urls() {
        let primary = vec![article("A", "Reuters", "u1"), article("B", "Reuters", "u2")];
        let secondary = vec![
            article("A (syndicated)", "Finnhub", "u1"),
            article("D", "Bloomberg", "u9"),
        ];
        let merged = merge_fallback(primary, secondary);
        let urls: Vec<&str> = merged.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["u1", "u2", "u9"]);
    }
}
