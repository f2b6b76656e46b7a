use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeRange {
  Today,
  Yesterday,
  #[serde(rename = "LAST_7_DAYS")]
  Last7Days,
  #[serde(rename = "LAST_14_DAYS")]
  Last14Days,
  #[default]
  #[serde(rename = "LAST_30_DAYS")]
  Last30Days,
  #[serde(rename = "LAST_90_DAYS")]
  Last90Days,
  ThisMonth,
  LastMonth,
}

impl TimeRange {
  pub const ALL: [TimeRange; 8] = [
    TimeRange::Today,
    TimeRange::Yesterday,
    TimeRange::Last7Days,
    TimeRange::Last14Days,
    TimeRange::Last30Days,
    TimeRange::Last90Days,
    TimeRange::ThisMonth,
    TimeRange::LastMonth,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      TimeRange::Today => "TODAY",
      TimeRange::Yesterday => "YESTERDAY",
      TimeRange::Last7Days => "LAST_7_DAYS",
      TimeRange::Last14Days => "LAST_14_DAYS",
      TimeRange::Last30Days => "LAST_30_DAYS",
      TimeRange::Last90Days => "LAST_90_DAYS",
      TimeRange::ThisMonth => "THIS_MONTH",
      TimeRange::LastMonth => "LAST_MONTH",
    }
  }

  /// Lenient parse used for request bodies: unknown or absent values fall back to 30 days.
  pub fn parse_or_default(raw: Option<&str>) -> TimeRange {
    let raw = raw.unwrap_or("").trim();
    TimeRange::ALL
      .into_iter()
      .find(|r| r.as_str().eq_ignore_ascii_case(raw))
      .unwrap_or_default()
  }

  /// GAQL predicate on `segments.date` for this range.
  pub fn gaql_condition(&self, today: NaiveDate) -> String {
    match self {
      TimeRange::Last90Days => {
        let end = today - Duration::days(1);
        let start = today - Duration::days(90);
        format!(
          "segments.date BETWEEN '{}' AND '{}'",
          start.format("%Y-%m-%d"),
          end.format("%Y-%m-%d")
        )
      }
      other => format!("segments.date DURING {}", other.as_str()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_falls_back_to_last_30_days() {
    assert_eq!(TimeRange::parse_or_default(None), TimeRange::Last30Days);
    assert_eq!(TimeRange::parse_or_default(Some("FOREVER")), TimeRange::Last30Days);
    assert_eq!(TimeRange::parse_or_default(Some("last_7_days")), TimeRange::Last7Days);
  }

  #[test]
  fn ninety_days_uses_explicit_dates() {
    let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
    assert_eq!(
      TimeRange::Last90Days.gaql_condition(today),
      "segments.date BETWEEN '2025-12-31' AND '2026-03-30'"
    );
    assert_eq!(
      TimeRange::ThisMonth.gaql_condition(today),
      "segments.date DURING THIS_MONTH"
    );
  }

  #[test]
  fn serde_uses_wire_names() {
    let v: TimeRange = serde_json::from_str("\"LAST_14_DAYS\"").unwrap();
    assert_eq!(v, TimeRange::Last14Days);
    assert_eq!(serde_json::to_string(&TimeRange::LastMonth).unwrap(), "\"LAST_MONTH\"");
  }
}
