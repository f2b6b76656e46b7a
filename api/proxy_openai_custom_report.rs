use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::config::site_url;
use roas_dog_rust::enrichment::build_enrichment;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed, raw_cookie_header};
use roas_dog_rust::internal_api::{InternalApiClient, MetricSource};
use roas_dog_rust::metrics::MetricRequest;
use roas_dog_rust::model_output::{chat_completion_body, strip_markdown_fences};
use roas_dog_rust::prompts::{custom_report_user_prompt, CUSTOM_REPORT_SYSTEM_INSTRUCTION};
use roas_dog_rust::providers::gemini::{generate_text, GeminiConfig, GeminiError, GenerateOptions};
use roas_dog_rust::request_log::{Fingerprint, RequestLog};
use roas_dog_rust::telemetry::init_tracing;

const ROUTE: &str = "proxy-openai-custom-report";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomReportRequest {
  #[serde(default, alias = "focusQuestion")]
  user_prompt: Option<String>,
  #[serde(default)]
  access_token: Option<String>,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  time_range: Option<String>,
  #[serde(default)]
  campaign_id: Option<String>,
}

impl CustomReportRequest {
  /// Present only when the request names an account, a range and a token to read it with.
  fn enrichment_request(&self) -> Option<MetricRequest> {
    let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    Some(MetricRequest {
      access_token: non_empty(&self.access_token)?,
      account_id: non_empty(&self.account_id)?,
      time_range: Some(non_empty(&self.time_range)?),
      campaign_id: non_empty(&self.campaign_id),
      skip_limit_check: true,
      ..MetricRequest::default()
    })
  }
}

struct CustomReportDeps<'a, S: MetricSource + ?Sized> {
  gemini: Option<&'a GeminiConfig>,
  source: &'a S,
  log: &'a RequestLog,
}

async fn run_custom_report<S: MetricSource + ?Sized>(
  body: Bytes,
  deps: &CustomReportDeps<'_, S>,
) -> Result<Response<ResponseBody>, ApiError> {
  let req: CustomReportRequest = parse_json_body(&body)?;
  let focus = req
    .user_prompt
    .as_deref()
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .ok_or_else(|| ApiError::BadRequest("userPrompt is required".to_string()))?;
  let gemini = deps
    .gemini
    .ok_or_else(|| ApiError::internal("config_error", GeminiError::NotConfigured))?;

  let enrichment = match req.enrichment_request() {
    Some(metric_req) => match build_enrichment(deps.source, &metric_req).await {
      Ok(tables) => Some(tables),
      Err(err) => {
        tracing::warn!(account_id = %metric_req.account_id, error = %err, "enrichment failed, using focus question alone");
        None
      }
    },
    None => None,
  };
  let prompt = custom_report_user_prompt(focus, enrichment.as_deref());

  deps
    .log
    .record(
      ROUTE,
      Fingerprint::length_of(&prompt),
      serde_json::json!({
        "prompt_length": prompt.len(),
        "enriched": enrichment.is_some(),
        "account_id": req.account_id,
      }),
    )
    .await;

  let text = generate_text(gemini, CUSTOM_REPORT_SYSTEM_INSTRUCTION, &prompt, &GenerateOptions::default())
    .await
    .map_err(|e| ApiError::upstream("Failed to generate custom report", e))?;

  json_response(StatusCode::OK, chat_completion_body(&strip_markdown_fences(&text)))
    .map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_custom_report<S: MetricSource + ?Sized>(
  method: &Method,
  body: Bytes,
  deps: &CustomReportDeps<'_, S>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_custom_report(body, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let source = InternalApiClient::new(site_url(), raw_cookie_header(req.headers()));
  let bytes = req.into_body().collect().await?.to_bytes();

  let gemini = GeminiConfig::from_env_optional();
  let deps = CustomReportDeps {
    gemini: gemini.as_ref(),
    source: &source,
    log: RequestLog::global(),
  };
  handle_custom_report(&method, bytes, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn as hyper_service_fn;
  use hyper_util::rt::TokioIo;
  use roas_dog_rust::internal_api::MetricFetchError;
  use roas_dog_rust::metrics::MetricEndpoint;
  use serde_json::{json, Value};
  use std::sync::{Arc, Mutex};
  use tokio::net::TcpListener;

  struct FakeSource {
    fail: bool,
  }

  #[async_trait]
  impl MetricSource for FakeSource {
    async fn fetch_metric(&self, endpoint: MetricEndpoint, request: &MetricRequest) -> Result<Value, MetricFetchError> {
      assert!(request.skip_limit_check);
      if self.fail {
        return Err(MetricFetchError::Status {
          path: endpoint.path().to_string(),
          status: 500,
          body: "down".into(),
        });
      }
      let mut body = serde_json::Map::new();
      body.insert(endpoint.response_key().to_string(), json!([{"campaignName": "Brand"}]));
      Ok(Value::Object(body))
    }
  }

  /// Echoes nothing back but keeps the user prompt each request carried.
  async fn spawn_gemini() -> (GeminiConfig, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let seen = prompts.clone();
    tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let seen = seen.clone();
        tokio::spawn(async move {
          let svc = hyper_service_fn(move |req: hyper::Request<Incoming>| {
            let seen = seen.clone();
            async move {
              let payload: Value =
                serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes()).unwrap();
              let user = payload["contents"][0]["parts"][0]["text"].as_str().unwrap().to_string();
              seen.lock().unwrap().push(user);
              Ok::<_, hyper::Error>(hyper::Response::new(Full::new(Bytes::from_static(
                br#"{"candidates":[{"content":{"parts":[{"text":"Answer"}]}}]}"#,
              ))))
            }
          });
          let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
        });
      }
    });
    let cfg = GeminiConfig {
      api_key: "test-key".into(),
      model: "gemini-2.0-flash".into(),
      api_base_url: format!("http://{addr}/v1beta"),
      max_output_tokens: 1024,
    };
    (cfg, prompts)
  }

  async fn call(source: &FakeSource, gemini: Option<&GeminiConfig>, body: &'static str) -> (StatusCode, Value) {
    let log = RequestLog::new(std::env::temp_dir().join(format!("roas-custom-{}", std::process::id())));
    let deps = CustomReportDeps { gemini, source, log: &log };
    let response = handle_custom_report(&Method::POST, Bytes::from(body), &deps).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn enriches_prompt_when_account_context_present() {
    let (cfg, prompts) = spawn_gemini().await;
    let (status, json) = call(
      &FakeSource { fail: false },
      Some(&cfg),
      r#"{"focusQuestion":"Why did CPA rise?","accessToken":"t","accountId":"1","timeRange":"LAST_7_DAYS"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["choices"][0]["message"]["content"], "Answer");
    let sent = prompts.lock().unwrap()[0].clone();
    assert!(sent.starts_with("Focus question: Why did CPA rise?"));
    assert!(sent.contains("## Campaign performance"));
  }

  #[tokio::test]
  async fn enrichment_failure_falls_back_to_focus_question() {
    let (cfg, prompts) = spawn_gemini().await;
    let (status, _) = call(
      &FakeSource { fail: true },
      Some(&cfg),
      r#"{"userPrompt":"Which keywords waste spend?","accessToken":"t","accountId":"1","timeRange":"LAST_7_DAYS"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(prompts.lock().unwrap()[0], "Focus question: Which keywords waste spend?");
  }

  #[test]
  fn skips_enrichment_without_time_range() {
    let req: CustomReportRequest =
      serde_json::from_str(r#"{"userPrompt":"q","accessToken":"t","accountId":"1"}"#).unwrap();
    assert!(req.enrichment_request().is_none());
  }

  #[tokio::test]
  async fn missing_focus_question_is_bad_request() {
    let (status, _) = call(&FakeSource { fail: false }, None, r#"{"accountId":"1"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }
}
