use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed};
use roas_dog_rust::model_output::{decode_model_json, BudgetSimulation};
use roas_dog_rust::prompts::{budget_user_prompt, BUDGET_SYSTEM_INSTRUCTION};
use roas_dog_rust::providers::gemini::{generate_text, GeminiConfig, GeminiError, GenerateOptions};
use roas_dog_rust::request_log::{Fingerprint, RequestLog};
use roas_dog_rust::telemetry::init_tracing;

const ROUTE: &str = "proxy-openai-budget";

#[derive(Debug, Deserialize)]
struct BudgetRequest {
  #[serde(default)]
  total_budget: Option<Value>,
  #[serde(default)]
  timeframe: Option<String>,
  #[serde(default)]
  industry: Option<String>,
  #[serde(default)]
  campaign_budget_allocation: Vec<Value>,
}

/// Accepts `10000` as well as `"10000"` or `"$10,000"`.
fn parse_budget(raw: &Value) -> Option<f64> {
  let n = match raw {
    Value::Number(n) => n.as_f64()?,
    Value::String(s) => s
      .chars()
      .filter(|c| !matches!(c, '$' | '€' | '£' | ',') && !c.is_whitespace())
      .collect::<String>()
      .parse()
      .ok()?,
    _ => return None,
  };
  (n.is_finite() && n > 0.0).then_some(n)
}

async fn run_budget(
  body: Bytes,
  gemini: Option<&GeminiConfig>,
  log: &RequestLog,
) -> Result<Response<ResponseBody>, ApiError> {
  let req: BudgetRequest = parse_json_body(&body)?;
  let text_field = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
  let (Some(total_budget), Some(timeframe), Some(industry)) = (
    req.total_budget.as_ref().and_then(parse_budget),
    text_field(&req.timeframe),
    text_field(&req.industry),
  ) else {
    return Err(ApiError::BadRequest(
      "total_budget, timeframe and industry are required".to_string(),
    ));
  };
  let gemini = gemini.ok_or_else(|| ApiError::internal("config_error", GeminiError::NotConfigured))?;

  let prompt = budget_user_prompt(total_budget, &timeframe, &industry, &req.campaign_budget_allocation);
  log
    .record(
      ROUTE,
      Fingerprint::length_of(&prompt),
      serde_json::json!({
        "prompt_length": prompt.len(),
        "total_budget": total_budget,
        "campaigns": req.campaign_budget_allocation.len(),
      }),
    )
    .await;

  let text = generate_text(gemini, BUDGET_SYSTEM_INSTRUCTION, &prompt, &GenerateOptions::json())
    .await
    .map_err(|e| ApiError::upstream("Failed to simulate budget", e))?;
  let simulation: BudgetSimulation = decode_model_json(&text).map_err(|e| {
    tracing::warn!(error = %e, response_length = text.len(), "budget simulation did not match schema");
    ApiError::upstream(e.to_string(), text.chars().take(500).collect::<String>())
  })?;

  let value = serde_json::to_value(&simulation).map_err(|e| ApiError::internal("Failed to build response", e))?;
  json_response(StatusCode::OK, value).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_budget(
  method: &Method,
  body: Bytes,
  gemini: Option<&GeminiConfig>,
  log: &RequestLog,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_budget(body, gemini, log).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  let gemini = GeminiConfig::from_env_optional();
  handle_budget(&method, bytes, gemini.as_ref(), RequestLog::global()).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn as hyper_service_fn;
  use hyper_util::rt::TokioIo;
  use tokio::net::TcpListener;

  async fn serve_one(model_text: &'static str) -> GeminiConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let svc = hyper_service_fn(move |req: hyper::Request<Incoming>| async move {
        let payload: Value = serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes()).unwrap();
        assert_eq!(payload["generationConfig"]["responseMimeType"], "application/json");
        let body = serde_json::json!({"candidates":[{"content":{"parts":[{"text": model_text}]}}]});
        Ok::<_, hyper::Error>(hyper::Response::new(Full::new(Bytes::from(body.to_string()))))
      });
      let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
    });
    GeminiConfig {
      api_key: "test-key".into(),
      model: "gemini-2.0-flash".into(),
      api_base_url: format!("http://{addr}/v1beta"),
      max_output_tokens: 1024,
    }
  }

  const REQUEST: &str =
    r#"{"total_budget":"$10,000","timeframe":"30 days","industry":"SaaS","campaign_budget_allocation":[{"name":"Brand","budget":4000}]}"#;

  async fn call(gemini: Option<&GeminiConfig>, body: &'static str) -> (StatusCode, Value) {
    let log = RequestLog::new(std::env::temp_dir().join(format!("roas-budget-{}", std::process::id())));
    let response = handle_budget(&Method::POST, Bytes::from(body), gemini, &log).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[test]
  fn budget_accepts_numbers_and_currency_strings() {
    assert_eq!(parse_budget(&serde_json::json!(2500)), Some(2500.0));
    assert_eq!(parse_budget(&serde_json::json!("$10,000")), Some(10000.0));
    assert_eq!(parse_budget(&serde_json::json!(" 1 250.50 ")), Some(1250.5));
    assert_eq!(parse_budget(&serde_json::json!("0")), None);
    assert_eq!(parse_budget(&serde_json::json!("-5000")), None);
    assert_eq!(parse_budget(&serde_json::json!("$-5,000")), None);
    assert_eq!(parse_budget(&serde_json::json!(-5000)), None);
    assert_eq!(parse_budget(&serde_json::json!("5k")), None);
    assert_eq!(parse_budget(&serde_json::json!(null)), None);
  }

  #[tokio::test]
  async fn returns_exact_simulation_keys() {
    let cfg = serve_one(
      "```json\n{\"simulation_results\":{\"estimated_clicks\":5000,\"estimated_conversions\":150,\"estimated_revenue\":30000,\"roi\":2.0},\"key_metrics\":{\"estimated_impressions\":120000,\"average_cpc\":2.0,\"ctr\":4.2,\"conversion_rate\":3.0}}\n```",
    )
    .await;
    let (status, json) = call(Some(&cfg), REQUEST).await;
    assert_eq!(status, StatusCode::OK);
    let mut top: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    top.sort_unstable();
    assert_eq!(top, ["key_metrics", "simulation_results"]);
    assert_eq!(json["simulation_results"]["roi"], 2.0);
    assert_eq!(json["key_metrics"].as_object().unwrap().len(), 4);
  }

  #[tokio::test]
  async fn schema_mismatch_is_bad_gateway() {
    let cfg = serve_one(r#"{"simulation_results":{"estimated_clicks":1}}"#).await;
    let (status, json) = call(Some(&cfg), REQUEST).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "Invalid JSON response from Gemini API");
  }

  #[tokio::test]
  async fn missing_inputs_are_bad_request() {
    let (status, _) = call(None, r#"{"timeframe":"30 days"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn negative_budget_is_bad_request() {
    let (status, _) = call(None, r#"{"total_budget":"-5000","timeframe":"30 days","industry":"SaaS"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }
}
