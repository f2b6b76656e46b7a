use serde_json::Value;
use vercel_runtime::Error;

use crate::config::{env_non_empty, env_required};
use crate::http_client::http_client_for_url;

const DEFAULT_API_BASE_URL: &str = "https://googleads.googleapis.com";
const DEFAULT_API_VERSION: &str = "v17";
// googleAds:search pages hold up to 10k rows; anything past this is not worth shipping to a prompt.
const MAX_PAGES: usize = 20;

#[derive(Debug, Clone)]
pub struct GoogleAdsConfig {
  pub developer_token: String,
  pub api_base_url: String,
  pub api_version: String,
}

impl GoogleAdsConfig {
  pub fn from_env() -> Result<Self, Error> {
    Ok(Self {
      developer_token: env_required("GOOGLE_ADS_DEVELOPER_TOKEN")?,
      api_base_url: env_non_empty("GOOGLE_ADS_API_BASE_URL")
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
      api_version: env_non_empty("GOOGLE_ADS_API_VERSION")
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
    })
  }

  fn endpoint(&self, path: &str) -> String {
    format!(
      "{}/{}/{}",
      self.api_base_url.trim_end_matches('/'),
      self.api_version.trim_matches('/'),
      path.trim_start_matches('/')
    )
  }
}

#[derive(Debug)]
pub struct GoogleAdsError {
  pub status: Option<u16>,
  pub message: String,
}

impl std::fmt::Display for GoogleAdsError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if let Some(status) = self.status {
      write!(f, "Google Ads error (status {status}): {}", self.message)
    } else {
      write!(f, "Google Ads error: {}", self.message)
    }
  }
}

impl std::error::Error for GoogleAdsError {}

fn transport_error(e: impl std::fmt::Display) -> GoogleAdsError {
  GoogleAdsError {
    status: None,
    message: e.to_string(),
  }
}

fn build_request(
  cfg: &GoogleAdsConfig,
  method: reqwest::Method,
  url: &str,
  access_token: &str,
  login_customer_id: Option<&str>,
) -> Result<reqwest::RequestBuilder, GoogleAdsError> {
  let client = http_client_for_url(url).map_err(transport_error)?;
  let mut req = client
    .request(method, url)
    .bearer_auth(access_token)
    .header("developer-token", &cfg.developer_token)
    .header("accept", "application/json");
  if let Some(login) = login_customer_id.map(str::trim).filter(|v| !v.is_empty()) {
    req = req.header("login-customer-id", login);
  }
  Ok(req)
}

async fn read_json(resp: reqwest::Response) -> Result<Value, GoogleAdsError> {
  let status = resp.status();
  let text = resp.text().await.map_err(transport_error)?;
  if !status.is_success() {
    let snippet = text.chars().take(800).collect::<String>();
    return Err(GoogleAdsError {
      status: Some(status.as_u16()),
      message: snippet,
    });
  }
  serde_json::from_str(&text).map_err(|e| GoogleAdsError {
    status: Some(status.as_u16()),
    message: format!("invalid json response: {e}"),
  })
}

/// Runs a GAQL query through `googleAds:search`, following `nextPageToken`.
pub async fn search(
  cfg: &GoogleAdsConfig,
  access_token: &str,
  customer_id: &str,
  login_customer_id: Option<&str>,
  query: &str,
) -> Result<Vec<Value>, GoogleAdsError> {
  let url = cfg.endpoint(&format!("customers/{customer_id}/googleAds:search"));
  let mut rows: Vec<Value> = Vec::new();
  let mut page_token: Option<String> = None;

  for _ in 0..MAX_PAGES {
    let mut payload = serde_json::json!({ "query": query });
    if let Some(token) = page_token.as_deref() {
      payload["pageToken"] = Value::String(token.to_string());
    }

    let resp = build_request(cfg, reqwest::Method::POST, &url, access_token, login_customer_id)?
      .json(&payload)
      .send()
      .await
      .map_err(transport_error)?;
    let json = read_json(resp).await?;

    if let Some(results) = json.get("results").and_then(|v| v.as_array()) {
      rows.extend(results.iter().cloned());
    }

    page_token = json
      .get("nextPageToken")
      .and_then(|v| v.as_str())
      .filter(|v| !v.is_empty())
      .map(str::to_string);
    if page_token.is_none() {
      break;
    }
  }

  Ok(rows)
}

/// Customer IDs (digits only) the token can access directly.
pub async fn list_accessible_customers(
  cfg: &GoogleAdsConfig,
  access_token: &str,
) -> Result<Vec<String>, GoogleAdsError> {
  let url = cfg.endpoint("customers:listAccessibleCustomers");
  let resp = build_request(cfg, reqwest::Method::GET, &url, access_token, None)?
    .send()
    .await
    .map_err(transport_error)?;
  let json = read_json(resp).await?;

  Ok(
    json
      .get("resourceNames")
      .and_then(|v| v.as_array())
      .map(|names| {
        names
          .iter()
          .filter_map(|n| n.as_str())
          .filter_map(parse_customer_resource_name)
          .collect()
      })
      .unwrap_or_default(),
  )
}

pub fn parse_customer_resource_name(resource_name: &str) -> Option<String> {
  let id = resource_name.trim().strip_prefix("customers/")?;
  if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
    return None;
  }
  Some(id.to_string())
}

pub async fn fetch_customer_name(
  cfg: &GoogleAdsConfig,
  access_token: &str,
  customer_id: &str,
) -> Result<Option<String>, GoogleAdsError> {
  let rows = search(
    cfg,
    access_token,
    customer_id,
    Some(customer_id),
    "SELECT customer.id, customer.descriptive_name FROM customer LIMIT 1",
  )
  .await?;

  Ok(rows.first().and_then(|row| {
    row
      .get("customer")
      .and_then(|c| c.get("descriptiveName"))
      .and_then(|v| v.as_str())
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_string)
  }))
}
