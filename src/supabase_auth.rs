use hyper::HeaderMap;
use serde::Deserialize;
use thiserror::Error;

use crate::config::SupabaseConfig;
use crate::error::ApiError;
use crate::http::{bearer_token, cookie_value};
use crate::http_client::http_client_for_url;

pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";
pub const CODE_VERIFIER_COOKIE: &str = "sb-code-verifier";

#[derive(Debug, Error)]
pub enum SupabaseError {
  #[error("supabase auth responded with status {status}: {body}")]
  Status { status: u16, body: String },
  #[error("supabase auth request failed: {0}")]
  Transport(String),
  #[error("invalid supabase auth response: {0}")]
  InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionUser {
  pub id: String,
  #[serde(default)]
  pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseSession {
  pub access_token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub expires_in: Option<i64>,
  pub user: SessionUser,
  /// Google access token, present when the sign-in requested provider scopes.
  #[serde(default)]
  pub provider_token: Option<String>,
  #[serde(default)]
  pub provider_refresh_token: Option<String>,
}

/// `Authorization: Bearer` wins over the `sb-access-token` cookie.
pub fn session_access_token(headers: &HeaderMap) -> Option<String> {
  let header = headers.get("authorization").and_then(|v| v.to_str().ok());
  bearer_token(header)
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
    .or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE))
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, SupabaseError> {
  let status = resp.status();
  let text = resp
    .text()
    .await
    .map_err(|e| SupabaseError::Transport(e.to_string()))?;
  if !status.is_success() {
    return Err(SupabaseError::Status {
      status: status.as_u16(),
      body: text.chars().take(500).collect(),
    });
  }
  serde_json::from_str(&text).map_err(|e| SupabaseError::InvalidResponse(e.to_string()))
}

pub async fn fetch_session_user(cfg: &SupabaseConfig, access_token: &str) -> Result<SessionUser, SupabaseError> {
  let url = format!("{}/auth/v1/user", cfg.url);
  let client = http_client_for_url(&url).map_err(|e| SupabaseError::Transport(e.to_string()))?;
  let resp = client
    .get(&url)
    .header("apikey", &cfg.service_role_key)
    .bearer_auth(access_token)
    .send()
    .await
    .map_err(|e| SupabaseError::Transport(e.to_string()))?;
  read_json(resp).await
}

/// Authenticated user for this request, or 401.
pub async fn require_session_user(cfg: &SupabaseConfig, headers: &HeaderMap) -> Result<SessionUser, ApiError> {
  let token = session_access_token(headers).ok_or_else(|| ApiError::Unauthorized("Unauthorized".to_string()))?;
  match fetch_session_user(cfg, &token).await {
    Ok(user) => Ok(user),
    Err(SupabaseError::Status { status, .. }) if status == 401 || status == 403 => {
      Err(ApiError::Unauthorized("Unauthorized".to_string()))
    }
    Err(err) => Err(ApiError::internal("Failed to verify session", err)),
  }
}

/// Like [`require_session_user`] but `None` when the request carries no session at all.
pub async fn optional_session_user(
  cfg: Option<&SupabaseConfig>,
  headers: &HeaderMap,
) -> Result<Option<SessionUser>, ApiError> {
  let Some(cfg) = cfg else {
    return Ok(None);
  };
  if session_access_token(headers).is_none() {
    return Ok(None);
  }
  require_session_user(cfg, headers).await.map(Some)
}

/// Completes the PKCE flow started by the browser client.
pub async fn exchange_code_for_session(
  cfg: &SupabaseConfig,
  auth_code: &str,
  code_verifier: &str,
) -> Result<SupabaseSession, SupabaseError> {
  let url = format!("{}/auth/v1/token?grant_type=pkce", cfg.url);
  let client = http_client_for_url(&url).map_err(|e| SupabaseError::Transport(e.to_string()))?;
  let resp = client
    .post(&url)
    .header("apikey", &cfg.service_role_key)
    .json(&serde_json::json!({
      "auth_code": auth_code,
      "code_verifier": code_verifier,
    }))
    .send()
    .await
    .map_err(|e| SupabaseError::Transport(e.to_string()))?;
  read_json(resp).await
}
