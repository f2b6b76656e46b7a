use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::config::SupabaseConfig;
use roas_dog_rust::db::get_pool_optional;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed};
use roas_dog_rust::model_output::{chat_completion_body, strip_markdown_fences};
use roas_dog_rust::prompts::WEEKLY_SYSTEM_INSTRUCTION;
use roas_dog_rust::providers::gemini::{generate_text, GeminiConfig, GeminiError, GenerateOptions};
use roas_dog_rust::report_pipeline::{ReportContext, ReportPipeline};
use roas_dog_rust::report_usage::ReportType;
use roas_dog_rust::reports_cache::DurableCacheTier;
use roas_dog_rust::request_log::{Fingerprint, RequestLog};
use roas_dog_rust::supabase_auth::optional_session_user;
use roas_dog_rust::telemetry::init_tracing;

const ROUTE: &str = "proxy-openai-weekly";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeeklyRequest {
  #[serde(default)]
  user_prompt: Option<String>,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  time_range: Option<String>,
  #[serde(default)]
  campaign_id: Option<String>,
}

struct WeeklyDeps<'a, T: DurableCacheTier> {
  gemini: Option<&'a GeminiConfig>,
  supabase: Option<&'a SupabaseConfig>,
  pipeline: &'a ReportPipeline<T>,
  log: &'a RequestLog,
}

async fn run_weekly<T: DurableCacheTier>(
  headers: &HeaderMap,
  body: Bytes,
  deps: &WeeklyDeps<'_, T>,
) -> Result<Response<ResponseBody>, ApiError> {
  let req: WeeklyRequest = parse_json_body(&body)?;
  let prompt = req
    .user_prompt
    .as_deref()
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .ok_or_else(|| ApiError::BadRequest("userPrompt is required".to_string()))?;
  let gemini = deps
    .gemini
    .ok_or_else(|| ApiError::internal("config_error", GeminiError::NotConfigured))?;

  let user = optional_session_user(deps.supabase, headers).await?;
  let ctx = ReportContext::from_request(
    user.as_ref(),
    req.account_id.as_deref(),
    req.time_range.as_deref(),
    req.campaign_id.as_deref(),
    ReportType::WeeklyAnalysis,
  );
  if let Some(ctx) = &ctx {
    if let Some(cached) = deps.pipeline.begin(ctx, chrono::Utc::now()).await? {
      return json_response(StatusCode::OK, chat_completion_body(&cached))
        .map_err(|e| ApiError::internal("Failed to build response", e));
    }
  }

  deps
    .log
    .record(
      ROUTE,
      Fingerprint::length_of(prompt),
      serde_json::json!({
        "prompt_length": prompt.len(),
        "account_id": req.account_id,
        "time_range": req.time_range,
      }),
    )
    .await;

  tracing::info!(prompt_length = prompt.len(), "generating weekly report");
  let text = generate_text(gemini, WEEKLY_SYSTEM_INSTRUCTION, prompt, &GenerateOptions::default())
    .await
    .map_err(|e| ApiError::upstream("Failed to generate weekly report", e))?;

  let content = strip_markdown_fences(&text);
  if let Some(ctx) = &ctx {
    deps.pipeline.finish(ctx, &content, chrono::Utc::now()).await;
  }
  json_response(StatusCode::OK, chat_completion_body(&content))
    .map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_weekly<T: DurableCacheTier>(
  method: &Method,
  headers: &HeaderMap,
  body: Bytes,
  deps: &WeeklyDeps<'_, T>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_weekly(headers, body, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();

  let gemini = GeminiConfig::from_env_optional();
  let supabase = SupabaseConfig::from_env().ok();
  let pipeline = ReportPipeline::from_pool(get_pool_optional().await);
  let deps = WeeklyDeps {
    gemini: gemini.as_ref(),
    supabase: supabase.as_ref(),
    pipeline: &pipeline,
    log: RequestLog::global(),
  };
  handle_weekly(&method, &headers, bytes, &deps).await
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
  use roas_dog_rust::reports_cache::PgCacheTier;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use tokio::net::TcpListener;

  async fn spawn_gemini(status: StatusCode, body: &'static str) -> (GeminiConfig, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let counter = counter.clone();
        tokio::spawn(async move {
          let svc = hyper_service_fn(move |req: hyper::Request<Incoming>| {
            let counter = counter.clone();
            async move {
              let payload: serde_json::Value =
                serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes()).unwrap();
              let system = payload["systemInstruction"]["parts"][0]["text"].as_str().unwrap().to_string();
              assert!(system.contains("weekly"));
              counter.fetch_add(1, Ordering::SeqCst);
              Ok::<_, hyper::Error>(
                hyper::Response::builder()
                  .status(status)
                  .body(Full::new(Bytes::from_static(body.as_bytes())))
                  .unwrap(),
              )
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
    (cfg, calls)
  }

  async fn call(gemini: &GeminiConfig, name: &str) -> (StatusCode, serde_json::Value) {
    let pipeline: ReportPipeline<PgCacheTier> = ReportPipeline::from_pool(None);
    let log = RequestLog::new(std::env::temp_dir().join(format!("roas-weekly-{name}-{}", std::process::id())));
    let deps = WeeklyDeps {
      gemini: Some(gemini),
      supabase: None,
      pipeline: &pipeline,
      log: &log,
    };
    let response = handle_weekly(
      &Method::POST,
      &HeaderMap::new(),
      Bytes::from_static(br#"{"userPrompt":"last week","accountId":"1"}"#),
      &deps,
    )
    .await
    .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn returns_completion_shape() {
    let (cfg, calls) = spawn_gemini(
      StatusCode::OK,
      r###"{"candidates":[{"content":{"parts":[{"text":"## Week in review"}]}}]}"###,
    )
    .await;
    let (status, json) = call(&cfg, "ok").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(json["choices"][0]["message"]["content"], "## Week in review");
  }

  #[tokio::test]
  async fn failure_is_not_retried() {
    let (cfg, calls) = spawn_gemini(StatusCode::TOO_MANY_REQUESTS, r#"{"error":"quota"}"#).await;
    let (status, json) = call(&cfg, "fail").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(json["details"].as_str().unwrap().contains("429"));
  }
}
