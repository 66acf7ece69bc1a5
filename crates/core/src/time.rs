use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Snapshot date for a run: the explicit `YYYY-MM-DD` override when given,
/// otherwise the UTC calendar date of `now_utc`.
pub fn resolve_report_date(
    report_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    match report_date_arg {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid report date {s:?}; expected YYYY-MM-DD")),
        None => Ok(now_utc.date_naive()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_to_utc_date() {
        // 23:30 UTC stays on the same UTC day regardless of local zone.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        assert_eq!(
            resolve_report_date(None, now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }

    #[test]
    fn explicit_override_wins() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(
            resolve_report_date(Some("2026-02-27"), now).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()
        );
        assert!(resolve_report_date(Some("27/02/2026"), now).is_err());
    }
}
