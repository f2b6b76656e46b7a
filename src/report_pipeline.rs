use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::ApiError;
use crate::report_usage::{enforce_report_limit, record_report_usage, NewReportUsage, ReportType, UsageLedger};
use crate::reports_cache::{CacheLookup, DurableCacheTier, PgCacheTier, ReportsCache};
use crate::supabase_auth::SessionUser;
use crate::time_range::TimeRange;

/// Who a generated report belongs to and what it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
  pub user_id: String,
  pub account_id: String,
  pub time_range: TimeRange,
  pub campaign_id: Option<String>,
  pub report_type: ReportType,
}

impl ReportContext {
  /// `None` unless the request has both a session user and an account.
  pub fn from_request(
    user: Option<&SessionUser>,
    account_id: Option<&str>,
    time_range: Option<&str>,
    campaign_id: Option<&str>,
    report_type: ReportType,
  ) -> Option<Self> {
    let user = user?;
    let account_id = account_id.map(str::trim).filter(|v| !v.is_empty())?;
    Some(Self {
      user_id: user.id.clone(),
      account_id: account_id.to_string(),
      time_range: TimeRange::parse_or_default(time_range),
      campaign_id: campaign_id
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
        .map(str::to_string),
      report_type,
    })
  }

  pub fn lookup(&self) -> CacheLookup<'_> {
    CacheLookup {
      user_id: &self.user_id,
      account_id: &self.account_id,
      time_range: self.time_range.as_str(),
      campaign_id: self.campaign_id.as_deref(),
      report_type: self.report_type.as_str(),
      data_only: false,
    }
  }
}

pub struct ReportPipeline<T: DurableCacheTier> {
  cache: ReportsCache<T>,
  usage: Option<Arc<dyn UsageLedger>>,
}

impl ReportPipeline<PgCacheTier> {
  pub fn from_pool(pool: Option<&'static PgPool>) -> Self {
    let usage = pool.map(|p| Arc::new(p.clone()) as Arc<dyn UsageLedger>);
    Self::new(ReportsCache::from_pool(pool), usage)
  }
}

impl<T: DurableCacheTier> ReportPipeline<T> {
  pub fn new(cache: ReportsCache<T>, usage: Option<Arc<dyn UsageLedger>>) -> Self {
    Self { cache, usage }
  }

  /// Cached report text on a hit; otherwise enforces the weekly quota and returns `None`.
  pub async fn begin(&self, ctx: &ReportContext, now: DateTime<Utc>) -> Result<Option<String>, ApiError> {
    if let Some(hit) = self.cache.get(&ctx.lookup(), now).await {
      tracing::info!(user_id = %ctx.user_id, account_id = %ctx.account_id, "report cache hit");
      return Ok(Some(hit.report_content));
    }

    let Some(ledger) = self.usage.as_deref() else {
      tracing::warn!(user_id = %ctx.user_id, "no database configured, skipping quota check");
      return Ok(None);
    };
    enforce_report_limit(ledger, &ctx.user_id, now).await?;
    Ok(None)
  }

  /// Caches the generated text and counts it against the quota. Both steps are best-effort.
  pub async fn finish(&self, ctx: &ReportContext, content: &str, now: DateTime<Utc>) {
    self.cache.set(&ctx.lookup(), content, None, now).await;

    let Some(ledger) = self.usage.as_deref() else {
      return;
    };
    let usage = NewReportUsage {
      report_type: ctx.report_type,
      account_id: Some(ctx.account_id.clone()),
      time_range: Some(ctx.time_range.as_str().to_string()),
      campaign_id: ctx.campaign_id.clone(),
    };
    if let Err(err) = record_report_usage(ledger, &ctx.user_id, &usage, now).await {
      tracing::warn!(user_id = %ctx.user_id, error = %err, "failed to record report usage");
    }
  }
}
