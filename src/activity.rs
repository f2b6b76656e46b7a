use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::internal_api::{response_rows, MetricFetchError, MetricSource};
use crate::metrics::{MetricEndpoint, MetricRequest};
use crate::time_range::TimeRange;

const MAX_CAMPAIGNS: usize = 3;
const MAX_DOMAINS: usize = 3;

/// 30-day activity summary for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountActivity {
  pub cost: f64,
  pub clicks: i64,
  pub campaigns: Vec<String>,
  pub domains: Vec<String>,
}

impl AccountActivity {
  /// Record used when an account's campaign report cannot be loaded.
  pub fn zeroed() -> Self {
    Self {
      cost: 0.0,
      clicks: 0,
      campaigns: Vec::new(),
      domains: Vec::new(),
    }
  }

  /// Cost and clicks do not count: an account with spend but no named campaign or domain is inactive.
  pub fn is_active(&self) -> bool {
    !self.campaigns.is_empty() || !self.domains.is_empty()
  }
}

/// How accounts are visited. Accounts share one Google Ads token, so they are walked one at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActivityConcurrency {
  #[default]
  Sequential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSummary {
  pub total_cost: f64,
  pub total_clicks: i64,
  pub campaigns: Vec<String>,
}

fn number_field(row: &Value, key: &str) -> f64 {
  match row.get(key) {
    Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
    Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
    _ => 0.0,
  }
}

pub fn summarize_campaigns(rows: &[Value]) -> CampaignSummary {
  let mut total_cost = 0.0;
  let mut total_clicks = 0i64;
  let mut spending: Vec<(String, f64)> = Vec::new();

  for row in rows {
    let cost = number_field(row, "costMicros") / 1_000_000.0;
    let clicks = number_field(row, "clicks") as i64;
    total_cost += cost;
    total_clicks += clicks;

    let name = row
      .get("campaignName")
      .and_then(|v| v.as_str())
      .map(str::trim)
      .filter(|v| !v.is_empty());
    if let Some(name) = name {
      if (cost > 0.0 || clicks > 0) && !spending.iter().any(|(n, _)| n == name) {
        spending.push((name.to_string(), cost));
      }
    }
  }

  spending.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
  CampaignSummary {
    total_cost,
    total_clicks,
    campaigns: spending.into_iter().take(MAX_CAMPAIGNS).map(|(n, _)| n).collect(),
  }
}

fn hostname(raw: &str) -> Option<String> {
  let url = reqwest::Url::parse(raw.trim()).ok()?;
  let host = url.host_str()?.to_ascii_lowercase();
  let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
  (!host.is_empty()).then_some(host)
}

/// Up to three unique hostnames from `finalUrl`, in first-seen order.
pub fn extract_domains(rows: &[Value]) -> Vec<String> {
  let mut seen: HashSet<String> = HashSet::new();
  let mut out = Vec::new();
  for row in rows {
    let Some(url) = row.get("finalUrl").and_then(|v| v.as_str()) else {
      continue;
    };
    if url.trim().eq_ignore_ascii_case("UNKNOWN") {
      continue;
    }
    if let Some(host) = hostname(url) {
      if seen.insert(host.clone()) {
        out.push(host);
        if out.len() == MAX_DOMAINS {
          break;
        }
      }
    }
  }
  out
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

fn activity_request(access_token: &str, account_id: &str) -> MetricRequest {
  MetricRequest {
    access_token: access_token.to_string(),
    account_id: account_id.to_string(),
    time_range: Some(TimeRange::Last30Days.as_str().to_string()),
    skip_limit_check: true,
    ..MetricRequest::default()
  }
}

pub async fn account_activity<S: MetricSource + ?Sized>(
  source: &S,
  access_token: &str,
  account_id: &str,
) -> Result<AccountActivity, MetricFetchError> {
  let req = activity_request(access_token, account_id);
  let campaigns_body = source.fetch_metric(MetricEndpoint::Campaigns, &req).await?;
  let summary = summarize_campaigns(&response_rows(MetricEndpoint::Campaigns, &campaigns_body));

  let domains = match source.fetch_metric(MetricEndpoint::LandingPages, &req).await {
    Ok(body) => extract_domains(&response_rows(MetricEndpoint::LandingPages, &body)),
    Err(err) => {
      tracing::warn!(account_id, error = %err, "landing pages unavailable, omitting domains");
      Vec::new()
    }
  };

  Ok(AccountActivity {
    cost: round2(summary.total_cost),
    clicks: summary.total_clicks,
    campaigns: summary.campaigns,
    domains,
  })
}

/// One record per account; a failed account gets [`AccountActivity::zeroed`].
pub async fn collect_account_activity<S: MetricSource + ?Sized>(
  source: &S,
  access_token: &str,
  account_ids: &[String],
  concurrency: ActivityConcurrency,
) -> BTreeMap<String, AccountActivity> {
  let mut out = BTreeMap::new();
  match concurrency {
    ActivityConcurrency::Sequential => {
      for account_id in account_ids {
        let activity = match account_activity(source, access_token, account_id).await {
          Ok(a) => a,
          Err(err) => {
            tracing::warn!(account_id = %account_id, error = %err, "campaign report failed, using zeroed activity");
            AccountActivity::zeroed()
          }
        };
        out.insert(account_id.clone(), activity);
      }
    }
  }
  out
}

/// `{[id]: {account_activity_last_30d: {...}}}`
pub fn activity_response_body(activity: &BTreeMap<String, AccountActivity>) -> Value {
  let mut map = serde_json::Map::new();
  for (id, a) in activity {
    map.insert(id.clone(), serde_json::json!({ "account_activity_last_30d": a }));
  }
  Value::Object(map)
}
