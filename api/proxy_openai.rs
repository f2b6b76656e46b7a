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
use roas_dog_rust::prompts::AUDIT_SYSTEM_INSTRUCTION;
use roas_dog_rust::providers::gemini::{generate_text, GeminiConfig, GeminiError, GenerateOptions};
use roas_dog_rust::report_pipeline::{ReportContext, ReportPipeline};
use roas_dog_rust::report_usage::ReportType;
use roas_dog_rust::reports_cache::DurableCacheTier;
use roas_dog_rust::request_log::{Fingerprint, RequestLog};
use roas_dog_rust::retry::{retry_with_backoff, RetryPolicy};
use roas_dog_rust::supabase_auth::optional_session_user;
use roas_dog_rust::telemetry::init_tracing;

const ROUTE: &str = "proxy-openai";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditRequest {
  #[serde(default)]
  user_prompt: Option<String>,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  time_range: Option<String>,
  #[serde(default)]
  campaign_id: Option<String>,
}

struct AuditDeps<'a, T: DurableCacheTier> {
  gemini: Option<&'a GeminiConfig>,
  retry: RetryPolicy,
  supabase: Option<&'a SupabaseConfig>,
  pipeline: &'a ReportPipeline<T>,
  log: &'a RequestLog,
}

async fn run_audit<T: DurableCacheTier>(
  headers: &HeaderMap,
  body: Bytes,
  deps: &AuditDeps<'_, T>,
) -> Result<Response<ResponseBody>, ApiError> {
  let req: AuditRequest = parse_json_body(&body)?;
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
    ReportType::AiAnalysis,
  );
  let now = chrono::Utc::now();
  if let Some(ctx) = &ctx {
    if let Some(cached) = deps.pipeline.begin(ctx, now).await? {
      return json_response(StatusCode::OK, chat_completion_body(&cached))
        .map_err(|e| ApiError::internal("Failed to build response", e));
    }
  }

  deps
    .log
    .record(
      ROUTE,
      Fingerprint::hash_of(prompt),
      serde_json::json!({
        "prompt_length": prompt.len(),
        "account_id": req.account_id,
        "time_range": req.time_range,
        "user_id": user.as_ref().map(|u| u.id.as_str()),
      }),
    )
    .await;

  let options = GenerateOptions::default();
  let options = &options;
  let text = retry_with_backoff(&deps.retry, move |attempt| {
    tracing::info!(attempt, prompt_length = prompt.len(), "generating audit report");
    generate_text(gemini, AUDIT_SYSTEM_INSTRUCTION, prompt, options)
  })
  .await
  .map_err(|e| ApiError::upstream("Failed to generate report", e))?;

  let content = strip_markdown_fences(&text);
  if let Some(ctx) = &ctx {
    deps.pipeline.finish(ctx, &content, chrono::Utc::now()).await;
  }
  json_response(StatusCode::OK, chat_completion_body(&content))
    .map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_proxy_openai<T: DurableCacheTier>(
  method: &Method,
  headers: &HeaderMap,
  body: Bytes,
  deps: &AuditDeps<'_, T>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_audit(headers, body, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();

  let gemini = GeminiConfig::from_env_optional();
  let supabase = SupabaseConfig::from_env().ok();
  let pipeline = ReportPipeline::from_pool(get_pool_optional().await);
  let deps = AuditDeps {
    gemini: gemini.as_ref(),
    retry: RetryPolicy::from_env(),
    supabase: supabase.as_ref(),
    pipeline: &pipeline,
    log: RequestLog::global(),
  };
  handle_proxy_openai(&method, &headers, bytes, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
