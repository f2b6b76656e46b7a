use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::activity::AccountActivity;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed};
use roas_dog_rust::model_output::{decode_model_json, ActiveAccountsAnalysis};
use roas_dog_rust::prompts::{active_accounts_user_prompt, ACTIVE_ACCOUNTS_SYSTEM_INSTRUCTION};
use roas_dog_rust::providers::gemini::{generate_text, GeminiConfig, GeminiError, GenerateOptions};
use roas_dog_rust::request_log::{Fingerprint, RequestLog};
use roas_dog_rust::telemetry::init_tracing;

const ROUTE: &str = "proxy-gemini-active-accounts";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveAccountsRequest {
  #[serde(default)]
  accounts_data: Option<Value>,
}

/// Reads `{account_activity_last_30d: {...}}` or a bare activity record.
fn activity_of(record: &Value) -> Option<AccountActivity> {
  let inner = record.get("account_activity_last_30d").unwrap_or(record);
  serde_json::from_value(inner.clone()).ok()
}

/// Keeps only accounts present in the input whose activity, when readable, is active.
fn filter_active(mut analysis: ActiveAccountsAnalysis, accounts: &Map<String, Value>) -> ActiveAccountsAnalysis {
  let before = analysis.active_accounts.len();
  analysis.active_accounts.retain(|entry| match accounts.get(&entry.account_id) {
    Some(record) => activity_of(record).map_or(true, |a| a.is_active()),
    None => false,
  });
  let dropped = before - analysis.active_accounts.len();
  if dropped > 0 {
    tracing::info!(dropped, "removed inactive or unknown accounts from model output");
  }
  analysis
}

async fn run_active_accounts(
  body: Bytes,
  gemini: Option<&GeminiConfig>,
  log: &RequestLog,
) -> Result<Response<ResponseBody>, ApiError> {
  let req: ActiveAccountsRequest = parse_json_body(&body)?;
  let accounts = match req.accounts_data {
    Some(Value::Object(map)) if !map.is_empty() => map,
    _ => return Err(ApiError::BadRequest("accountsData is required".to_string())),
  };
  let gemini = gemini.ok_or_else(|| ApiError::internal("config_error", GeminiError::NotConfigured))?;

  let accounts_value = Value::Object(accounts);
  let prompt = active_accounts_user_prompt(&accounts_value);
  log
    .record(
      ROUTE,
      Fingerprint::length_of(&prompt),
      serde_json::json!({ "prompt_length": prompt.len(), "accounts": accounts_value.as_object().map_or(0, Map::len) }),
    )
    .await;

  let text = generate_text(gemini, ACTIVE_ACCOUNTS_SYSTEM_INSTRUCTION, &prompt, &GenerateOptions::json())
    .await
    .map_err(|e| ApiError::upstream("Failed to analyze accounts", e))?;
  let analysis: ActiveAccountsAnalysis = decode_model_json(&text)
    .map_err(|e| ApiError::upstream(e.to_string(), text.chars().take(500).collect::<String>()))?;

  let empty = Map::new();
  let analysis = filter_active(analysis, accounts_value.as_object().unwrap_or(&empty));
  let value = serde_json::to_value(&analysis).map_err(|e| ApiError::internal("Failed to build response", e))?;
  json_response(StatusCode::OK, value).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_active_accounts(
  method: &Method,
  body: Bytes,
  gemini: Option<&GeminiConfig>,
  log: &RequestLog,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_active_accounts(body, gemini, log).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  let gemini = GeminiConfig::from_env_optional();
  handle_active_accounts(&method, bytes, gemini.as_ref(), RequestLog::global()).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
