use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode, Uri};
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::config::SupabaseConfig;
use roas_dog_rust::db::get_pool_optional;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{get_query_param, json_response, method_not_allowed};
use roas_dog_rust::metrics::{run_metric_report, MetricEndpoint, MetricReportError, MetricRequest};
use roas_dog_rust::providers::google_ads::GoogleAdsConfig;
use roas_dog_rust::report_usage::{enforce_report_limit, UsageLedger};
use roas_dog_rust::supabase_auth::optional_session_user;
use roas_dog_rust::telemetry::init_tracing;

const ROUTE_PREFIX: &str = "/api/google-ads/";

/// `/api/google-ads/<path>`, or `?metric=<path>` when the request was rewritten.
fn endpoint_from_uri(uri: &Uri) -> Option<MetricEndpoint> {
  if let Some(metric) = get_query_param(uri, "metric") {
    return MetricEndpoint::from_path(&metric);
  }
  uri
    .path()
    .strip_prefix(ROUTE_PREFIX)
    .and_then(MetricEndpoint::from_path)
}

struct ReportDeps<'a> {
  google_ads: Option<&'a GoogleAdsConfig>,
  supabase: Option<&'a SupabaseConfig>,
  usage: Option<&'a dyn UsageLedger>,
}

async fn enforce_quota(headers: &HeaderMap, deps: &ReportDeps<'_>) -> Result<(), ApiError> {
  let Some(user) = optional_session_user(deps.supabase, headers).await? else {
    return Ok(());
  };
  let Some(usage) = deps.usage else {
    return Ok(());
  };
  enforce_report_limit(usage, &user.id, chrono::Utc::now()).await?;
  Ok(())
}

async fn run_report(
  headers: &HeaderMap,
  uri: &Uri,
  body: Bytes,
  deps: &ReportDeps<'_>,
) -> Result<Response<ResponseBody>, ApiError> {
  let endpoint = endpoint_from_uri(uri)
    .ok_or_else(|| ApiError::BadRequest(format!("Unknown report: {}", uri.path())))?;
  let req: MetricRequest = parse_json_body(&body)?;

  if !req.skip_limit_check {
    enforce_quota(headers, deps).await?;
  }

  let cfg = deps
    .google_ads
    .ok_or_else(|| ApiError::internal("config_error", "Missing GOOGLE_ADS_DEVELOPER_TOKEN"))?;

  let data = run_metric_report(cfg, endpoint, &req, chrono::Utc::now().date_naive())
    .await
    .map_err(|e| match e {
      MetricReportError::GoogleAds(err) => {
        ApiError::upstream(format!("Failed to fetch {} report", endpoint.path()), err)
      }
      other => ApiError::BadRequest(other.to_string()),
    })?;

  json_response(StatusCode::OK, data).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_report(
  method: &Method,
  headers: &HeaderMap,
  uri: &Uri,
  body: Bytes,
  deps: &ReportDeps<'_>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  respond(run_report(headers, uri, body, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let bytes = req.into_body().collect().await?.to_bytes();

  let google_ads = GoogleAdsConfig::from_env().ok();
  let supabase = SupabaseConfig::from_env().ok();
  let pool = get_pool_optional().await;
  let deps = ReportDeps {
    google_ads: google_ads.as_ref(),
    supabase: supabase.as_ref(),
    usage: pool.map(|p| p as &dyn UsageLedger),
  };
  handle_report(&method, &headers, &uri, bytes, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
