use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use sqlx::PgPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::config::SupabaseConfig;
use roas_dog_rust::db::get_pool_optional;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{get_query_param, json_response, method_not_allowed};
use roas_dog_rust::report_usage::{check_report_limit, record_report_usage, NewReportUsage};
use roas_dog_rust::supabase_auth::require_session_user;
use roas_dog_rust::telemetry::init_tracing;

struct UsageDeps<'a> {
  supabase: Option<&'a SupabaseConfig>,
  pool: Option<&'a PgPool>,
}

/// `?limit=` override; ignored unless it is a positive integer.
fn limit_override(uri: &Uri) -> Option<i64> {
  get_query_param(uri, "limit")
    .and_then(|v| v.trim().parse::<i64>().ok())
    .filter(|v| *v > 0)
}

async fn run_usage(
  method: &Method,
  headers: &HeaderMap,
  uri: &Uri,
  body: Bytes,
  deps: &UsageDeps<'_>,
) -> Result<Response<ResponseBody>, ApiError> {
  let supabase = deps
    .supabase
    .ok_or_else(|| ApiError::internal("config_error", "Missing NEXT_PUBLIC_SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY"))?;
  let user = require_session_user(supabase, headers).await?;

  // Body is validated before touching the database.
  let usage: Option<NewReportUsage> = if method == Method::POST {
    Some(parse_json_body(&body)?)
  } else {
    None
  };
  let pool = deps
    .pool
    .ok_or_else(|| ApiError::internal("config_error", "Missing DATABASE_URL"))?;
  let now = chrono::Utc::now();

  let Some(usage) = usage else {
    let status = check_report_limit(pool, &user.id, limit_override(uri), now)
      .await
      .map_err(|e| ApiError::internal("Failed to check report limit", e))?;
    let value = serde_json::to_value(&status).map_err(|e| ApiError::internal("Failed to build response", e))?;
    return json_response(StatusCode::OK, value).map_err(|e| ApiError::internal("Failed to build response", e));
  };

  let id = record_report_usage(pool, &user.id, &usage, now)
    .await
    .map_err(|e| ApiError::internal("Failed to record report usage", e))?;
  json_response(
    StatusCode::CREATED,
    serde_json::json!({ "id": id, "report_type": usage.report_type.as_str() }),
  )
  .map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_usage(
  method: &Method,
  headers: &HeaderMap,
  uri: &Uri,
  body: Bytes,
  deps: &UsageDeps<'_>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET && method != Method::POST {
    return method_not_allowed();
  }
  respond(run_usage(method, headers, uri, body, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();

  let supabase = SupabaseConfig::from_env().ok();
  let deps = UsageDeps {
    supabase: supabase.as_ref(),
    pool: get_pool_optional().await,
  };
  handle_usage(&method, &headers, &uri, bytes, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
