use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use sqlx::PgPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::activity::{activity_response_body, collect_account_activity, ActivityConcurrency};
use roas_dog_rust::config::{site_url, SupabaseConfig};
use roas_dog_rust::db::{fetch_google_ads_account_ids, get_pool_optional};
use roas_dog_rust::error::{respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed, raw_cookie_header};
use roas_dog_rust::internal_api::{InternalApiClient, MetricSource};
use roas_dog_rust::providers::google_oauth::{google_refresh_client_from_env, GoogleRefreshClient};
use roas_dog_rust::supabase_auth::require_session_user;
use roas_dog_rust::telemetry::init_tracing;
use roas_dog_rust::token_store::load_fresh_token;

struct ActivityDeps<'a> {
  supabase: Option<&'a SupabaseConfig>,
  pool: Option<&'a PgPool>,
  refresh_client: Option<&'a GoogleRefreshClient>,
  base_url: &'a str,
}

async fn activity_for_accounts<S: MetricSource + ?Sized>(
  source: &S,
  access_token: &str,
  account_ids: &[String],
) -> Result<Response<ResponseBody>, ApiError> {
  if account_ids.is_empty() {
    return Err(ApiError::NotFound("No Google Ads accounts found".to_string()));
  }
  let activity = collect_account_activity(source, access_token, account_ids, ActivityConcurrency::Sequential).await;
  let active = activity.values().filter(|a| a.is_active()).count();
  tracing::info!(accounts = activity.len(), active, "collected account activity");
  json_response(StatusCode::OK, activity_response_body(&activity))
    .map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn run_activity(headers: &HeaderMap, deps: &ActivityDeps<'_>) -> Result<Response<ResponseBody>, ApiError> {
  let supabase = deps
    .supabase
    .ok_or_else(|| ApiError::internal("config_error", "Missing NEXT_PUBLIC_SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY"))?;
  let user = require_session_user(supabase, headers).await?;
  let pool = deps
    .pool
    .ok_or_else(|| ApiError::internal("config_error", "Missing DATABASE_URL"))?;

  let now = chrono::Utc::now();
  let token = load_fresh_token(pool, deps.refresh_client, &user.id, now)
    .await
    .map_err(|e| ApiError::internal("Failed to load Google Ads token", e))?
    .ok_or_else(|| ApiError::Unauthorized("Google Ads is not connected".to_string()))?;

  let account_ids = fetch_google_ads_account_ids(pool, &user.id)
    .await
    .map_err(|e| ApiError::internal("Failed to load Google Ads accounts", e))?;

  let source = InternalApiClient::new(deps.base_url, raw_cookie_header(headers));
  activity_for_accounts(&source, &token.access_token, &account_ids).await
}

async fn handle_account_activity_stats(
  method: &Method,
  headers: &HeaderMap,
  deps: &ActivityDeps<'_>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST && method != Method::GET {
    return method_not_allowed();
  }
  respond(run_activity(headers, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let _ = req.into_body().collect().await?;

  let supabase = SupabaseConfig::from_env().ok();
  let refresh_client = match google_refresh_client_from_env() {
    Ok(client) => Some(client),
    Err(err) => {
      tracing::warn!(error = %err, "google oauth not configured, tokens will not be refreshed");
      None
    }
  };
  let base_url = site_url();
  let deps = ActivityDeps {
    supabase: supabase.as_ref(),
    pool: get_pool_optional().await,
    refresh_client: refresh_client.as_ref(),
    base_url: &base_url,
  };
  handle_account_activity_stats(&method, &headers, &deps).await
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
  use roas_dog_rust::internal_api::MetricFetchError;
  use roas_dog_rust::metrics::{MetricEndpoint, MetricRequest};
  use serde_json::{json, Value};

  struct FakeSource;

  #[async_trait]
  impl MetricSource for FakeSource {
    async fn fetch_metric(&self, endpoint: MetricEndpoint, request: &MetricRequest) -> Result<Value, MetricFetchError> {
      if request.account_id == "broken" {
        return Err(MetricFetchError::Status {
          path: endpoint.path().to_string(),
          status: 500,
          body: "boom".into(),
        });
      }
      Ok(match endpoint {
        MetricEndpoint::Campaigns => json!({"campaigns": [
          {"campaignName": "Brand", "costMicros": "2500000", "clicks": "4"}
        ]}),
        MetricEndpoint::LandingPages => json!({"landingPages": [{"finalUrl": "https://shop.example/a"}]}),
        _ => json!({}),
      })
    }
  }

  async fn body_json(response: Response<ResponseBody>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn no_accounts_is_not_found() {
    let err = activity_for_accounts(&FakeSource, "t", &[]).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn failing_account_gets_zeroed_record() {
    let ids = vec!["111".to_string(), "broken".to_string()];
    let response = activity_for_accounts(&FakeSource, "t", &ids).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let ok = &json["111"]["account_activity_last_30d"];
    assert_eq!(ok["campaigns"], json!(["Brand"]));
    assert_eq!(ok["domains"], json!(["shop.example"]));
    let broken = &json["broken"]["account_activity_last_30d"];
    assert_eq!(broken["cost"], 0.0);
    assert_eq!(broken["campaigns"], json!([]));
  }

  #[tokio::test]
  async fn missing_session_is_unauthorized() {
    let supabase = SupabaseConfig {
      url: "http://127.0.0.1:9".into(),
      service_role_key: "k".into(),
    };
    let deps = ActivityDeps {
      supabase: Some(&supabase),
      pool: None,
      refresh_client: None,
      base_url: "http://127.0.0.1:9",
    };
    let response = handle_account_activity_stats(&Method::POST, &HeaderMap::new(), &deps)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn rejects_other_methods() {
    let deps = ActivityDeps {
      supabase: None,
      pool: None,
      refresh_client: None,
      base_url: "",
    };
    let response = handle_account_activity_stats(&Method::DELETE, &HeaderMap::new(), &deps)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
