use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use vercel_runtime::Error;

use crate::config::weekly_report_limit;
use crate::db;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
  AiAnalysis,
  WeeklyAnalysis,
}

impl ReportType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReportType::AiAnalysis => "ai_analysis",
      ReportType::WeeklyAnalysis => "weekly_analysis",
    }
  }

  pub fn parse(raw: &str) -> Option<ReportType> {
    match raw.trim() {
      "ai_analysis" => Some(ReportType::AiAnalysis),
      "weekly_analysis" => Some(ReportType::WeeklyAnalysis),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportLimitStatus {
  pub can_generate: bool,
  pub current_usage: i64,
  pub limit: i64,
  pub remaining: i64,
  pub week_start: NaiveDate,
  pub resets_at: DateTime<Utc>,
}

/// Monday of the ISO week containing `now` (UTC).
pub fn week_start_for(now: DateTime<Utc>) -> NaiveDate {
  let today = now.date_naive();
  today - Duration::days(today.weekday().num_days_from_monday() as i64)
}

/// Next Monday 00:00 UTC.
pub fn resets_at(week_start: NaiveDate) -> DateTime<Utc> {
  let next = week_start + Duration::days(7);
  Utc.from_utc_datetime(&next.and_time(chrono::NaiveTime::MIN))
}

pub fn evaluate_report_limit(used: i64, limit: i64, now: DateTime<Utc>) -> ReportLimitStatus {
  let week_start = week_start_for(now);
  let remaining = (limit - used).max(0);
  ReportLimitStatus {
    can_generate: used < limit,
    current_usage: used,
    limit,
    remaining,
    week_start,
    resets_at: resets_at(week_start),
  }
}

/// Where generated reports are counted.
#[async_trait]
pub trait UsageLedger: Send + Sync {
  async fn count_for_week(&self, user_id: &str, week_start: NaiveDate) -> Result<i64, Error>;
  async fn insert(&self, user_id: &str, usage: &NewReportUsage, week_start: NaiveDate) -> Result<i64, Error>;
}

#[async_trait]
impl UsageLedger for PgPool {
  async fn count_for_week(&self, user_id: &str, week_start: NaiveDate) -> Result<i64, Error> {
    db::count_report_usage_for_week(self, user_id, week_start).await
  }

  async fn insert(&self, user_id: &str, usage: &NewReportUsage, week_start: NaiveDate) -> Result<i64, Error> {
    db::insert_report_usage(
      self,
      user_id,
      usage.report_type.as_str(),
      usage.account_id.as_deref(),
      usage.time_range.as_deref(),
      usage.campaign_id.as_deref(),
      week_start,
    )
    .await
  }
}

pub async fn check_report_limit<L: UsageLedger + ?Sized>(
  ledger: &L,
  user_id: &str,
  limit: Option<i64>,
  now: DateTime<Utc>,
) -> Result<ReportLimitStatus, Error> {
  let limit = limit.filter(|l| *l > 0).unwrap_or_else(weekly_report_limit);
  let used = ledger.count_for_week(user_id, week_start_for(now)).await?;
  Ok(evaluate_report_limit(used, limit, now))
}

/// 429 with the limit status under `usage` once the week is used up.
pub async fn enforce_report_limit<L: UsageLedger + ?Sized>(
  ledger: &L,
  user_id: &str,
  now: DateTime<Utc>,
) -> Result<ReportLimitStatus, ApiError> {
  let status = check_report_limit(ledger, user_id, None, now)
    .await
    .map_err(|e| ApiError::internal("Failed to check report limit", e))?;
  if !status.can_generate {
    tracing::info!(user_id, used = status.current_usage, limit = status.limit, "weekly report limit reached");
    return Err(ApiError::QuotaExceeded {
      message: "Weekly report limit reached".to_string(),
      status: serde_json::to_value(&status).unwrap_or_default(),
    });
  }
  Ok(status)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReportUsage {
  #[serde(alias = "reportType")]
  pub report_type: ReportType,
  #[serde(default, alias = "accountId")]
  pub account_id: Option<String>,
  #[serde(default, alias = "timeRange")]
  pub time_range: Option<String>,
  #[serde(default, alias = "campaignId")]
  pub campaign_id: Option<String>,
}

/// Appends one usage row and returns its id.
pub async fn record_report_usage<L: UsageLedger + ?Sized>(
  ledger: &L,
  user_id: &str,
  usage: &NewReportUsage,
  now: DateTime<Utc>,
) -> Result<i64, Error> {
  let id = ledger.insert(user_id, usage, week_start_for(now)).await?;
  tracing::info!(user_id, report_type = usage.report_type.as_str(), id, "recorded report usage");
  Ok(id)
}
