use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::http_client::http_client_for_url;
use crate::metrics::{MetricEndpoint, MetricRequest};

#[derive(Debug, Error)]
pub enum MetricFetchError {
  #[error("{path} responded with status {status}: {body}")]
  Status {
    path: String,
    status: u16,
    body: String,
  },
  #[error("request to {path} failed: {message}")]
  Transport { path: String, message: String },
  #[error("invalid json from {path}: {message}")]
  InvalidJson { path: String, message: String },
}

/// Anything that can serve a per-metric report.
#[async_trait]
pub trait MetricSource: Send + Sync {
  async fn fetch_metric(&self, endpoint: MetricEndpoint, request: &MetricRequest) -> Result<Value, MetricFetchError>;
}

/// Calls this deployment's own `/api/google-ads/<path>` routes, forwarding the caller's cookie.
#[derive(Debug, Clone)]
pub struct InternalApiClient {
  pub base_url: String,
  pub cookie: Option<String>,
}

impl InternalApiClient {
  pub fn new(base_url: impl Into<String>, cookie: Option<String>) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      cookie,
    }
  }

  pub fn route_path(endpoint: MetricEndpoint) -> String {
    format!("/api/google-ads/{}", endpoint.path())
  }
}

#[async_trait]
impl MetricSource for InternalApiClient {
  async fn fetch_metric(&self, endpoint: MetricEndpoint, request: &MetricRequest) -> Result<Value, MetricFetchError> {
    let path = Self::route_path(endpoint);
    let url = format!("{}{path}", self.base_url);
    let transport = |e: &dyn std::fmt::Display| MetricFetchError::Transport {
      path: path.clone(),
      message: e.to_string(),
    };

    let client = http_client_for_url(&url).map_err(|e| transport(&e))?;
    let mut req = client.post(&url).json(request);
    if let Some(cookie) = self.cookie.as_deref() {
      req = req.header("cookie", cookie);
    }

    let resp = req.send().await.map_err(|e| transport(&e))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport(&e))?;
    if !status.is_success() {
      return Err(MetricFetchError::Status {
        path,
        status: status.as_u16(),
        body: text,
      });
    }

    serde_json::from_str(&text).map_err(|e| MetricFetchError::InvalidJson {
      path,
      message: e.to_string(),
    })
  }
}

/// Rows under the endpoint's response key, or an empty list.
pub fn response_rows(endpoint: MetricEndpoint, body: &Value) -> Vec<Value> {
  body
    .get(endpoint.response_key())
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default()
}
