use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::config::SupabaseConfig;
use roas_dog_rust::db::get_pool_optional;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed};
use roas_dog_rust::reports_cache::{CacheLookup, DurableCacheTier, ReportsCache};
use roas_dog_rust::supabase_auth::require_session_user;
use roas_dog_rust::telemetry::init_tracing;
use roas_dog_rust::time_range::TimeRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CacheOp {
  Get,
  Set,
  Cleanup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRequest {
  op: CacheOp,
  #[serde(default)]
  account_id: Option<String>,
  #[serde(default)]
  time_range: Option<String>,
  #[serde(default)]
  campaign_id: Option<String>,
  #[serde(default)]
  report_type: Option<String>,
  #[serde(default)]
  data_only: bool,
  #[serde(default)]
  report_content: Option<String>,
  #[serde(default)]
  dashboard_data: Option<serde_json::Value>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
  v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn ok_json(value: serde_json::Value) -> Result<Response<ResponseBody>, ApiError> {
  json_response(StatusCode::OK, value).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn run_cache<T: DurableCacheTier>(
  headers: &HeaderMap,
  body: Bytes,
  supabase: Option<&SupabaseConfig>,
  cache: &ReportsCache<T>,
) -> Result<Response<ResponseBody>, ApiError> {
  let supabase =
    supabase.ok_or_else(|| ApiError::internal("config_error", "Missing NEXT_PUBLIC_SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY"))?;
  let user = require_session_user(supabase, headers).await?;
  let req: CacheRequest = parse_json_body(&body)?;
  let now = chrono::Utc::now();

  if req.op == CacheOp::Cleanup {
    let removed = cache.cleanup_expired(now).await;
    tracing::info!(removed, "cleaned up expired report cache entries");
    return ok_json(serde_json::json!({ "removed": removed }));
  }

  let (Some(account_id), Some(report_type)) = (non_empty(&req.account_id), non_empty(&req.report_type)) else {
    return Err(ApiError::BadRequest("accountId and reportType are required".to_string()));
  };
  let time_range = TimeRange::parse_or_default(req.time_range.as_deref());
  let lookup = CacheLookup {
    user_id: &user.id,
    account_id,
    time_range: time_range.as_str(),
    campaign_id: non_empty(&req.campaign_id).filter(|c| !c.eq_ignore_ascii_case("all")),
    report_type,
    data_only: req.data_only,
  };

  if req.op == CacheOp::Get {
    let entry = cache.get(&lookup, now).await;
    return ok_json(serde_json::json!({ "hit": entry.is_some(), "entry": entry }));
  }

  let content = non_empty(&req.report_content)
    .ok_or_else(|| ApiError::BadRequest("reportContent is required".to_string()))?;
  let entry = cache.set(&lookup, content, req.dashboard_data.clone(), now).await;
  ok_json(serde_json::json!({ "entry": entry }))
}

async fn handle_cache<T: DurableCacheTier>(
  method: &Method,
  headers: &HeaderMap,
  body: Bytes,
  supabase: Option<&SupabaseConfig>,
  cache: &ReportsCache<T>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_cache(headers, body, supabase, cache).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();

  let supabase = SupabaseConfig::from_env().ok();
  let cache = ReportsCache::from_pool(get_pool_optional().await);
  handle_cache(&method, &headers, bytes, supabase.as_ref(), &cache).await
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
  use roas_dog_rust::reports_cache::{MemoryTier, PgCacheTier};
  use tokio::net::TcpListener;

  async fn spawn_supabase() -> SupabaseConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(async move {
          let svc = hyper_service_fn(|_req: hyper::Request<Incoming>| async move {
            Ok::<_, hyper::Error>(hyper::Response::new(Full::new(Bytes::from_static(br#"{"id":"user-1"}"#))))
          });
          let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
        });
      }
    });
    SupabaseConfig {
      url: format!("http://{addr}"),
      service_role_key: "service".into(),
    }
  }

  fn authed() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("cookie", "sb-access-token=token".parse().unwrap());
    headers
  }

  async fn call(
    supabase: &SupabaseConfig,
    cache: &ReportsCache<PgCacheTier>,
    headers: &HeaderMap,
    body: String,
  ) -> (StatusCode, serde_json::Value) {
    let response = handle_cache(&Method::POST, headers, Bytes::from(body), Some(supabase), cache)
      .await
      .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn set_then_get_round_trips_for_session_user() {
    let supabase = spawn_supabase().await;
    let cache = ReportsCache::new(PgCacheTier::new(None), MemoryTier::default());
    let base = serde_json::json!({"accountId": "1", "timeRange": "LAST_7_DAYS", "reportType": "ai_analysis"});

    let mut get = base.clone();
    get["op"] = "get".into();
    let (status, json) = call(&supabase, &cache, &authed(), get.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hit"], false);

    let mut set = base.clone();
    set["op"] = "set".into();
    set["reportContent"] = "# Report".into();
    let (status, json) = call(&supabase, &cache, &authed(), set.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["entry"]["user_id"], "user-1");

    let (_, json) = call(&supabase, &cache, &authed(), get.to_string()).await;
    assert_eq!(json["hit"], true);
    assert_eq!(json["entry"]["report_content"], "# Report");

    let mut data_only = get.clone();
    data_only["dataOnly"] = true.into();
    let (_, json) = call(&supabase, &cache, &authed(), data_only.to_string()).await;
    assert_eq!(json["hit"], false);
  }

  #[tokio::test]
  async fn cleanup_reports_removed_count() {
    let supabase = spawn_supabase().await;
    let cache = ReportsCache::new(PgCacheTier::new(None), MemoryTier::default());
    let (status, json) = call(&supabase, &cache, &authed(), r#"{"op":"cleanup"}"#.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 0);
  }

  #[tokio::test]
  async fn rejects_missing_fields_and_unknown_ops() {
    let supabase = spawn_supabase().await;
    let cache = ReportsCache::new(PgCacheTier::new(None), MemoryTier::default());
    let (status, _) = call(&supabase, &cache, &authed(), r#"{"op":"get"}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&supabase, &cache, &authed(), r#"{"op":"purge"}"#.to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn requires_session() {
    let supabase = spawn_supabase().await;
    let cache = ReportsCache::new(PgCacheTier::new(None), MemoryTier::default());
    let (status, _) = call(&supabase, &cache, &HeaderMap::new(), r#"{"op":"cleanup"}"#.to_string()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }
}
