use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use sqlx::PgPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::accounts::refresh_accounts;
use roas_dog_rust::config::SupabaseConfig;
use roas_dog_rust::db::{fetch_google_ads_accounts, get_pool_optional, GoogleAdsAccountRow};
use roas_dog_rust::error::{respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed};
use roas_dog_rust::providers::google_ads::GoogleAdsConfig;
use roas_dog_rust::providers::google_oauth::{google_refresh_client_from_env, GoogleRefreshClient};
use roas_dog_rust::supabase_auth::require_session_user;
use roas_dog_rust::telemetry::init_tracing;
use roas_dog_rust::token_store::load_fresh_token;

struct AccountsDeps<'a> {
  supabase: Option<&'a SupabaseConfig>,
  pool: Option<&'a PgPool>,
  google_ads: Option<&'a GoogleAdsConfig>,
  refresh_client: Option<&'a GoogleRefreshClient>,
}

fn accounts_body(accounts: &[GoogleAdsAccountRow]) -> serde_json::Value {
  serde_json::json!({ "accounts": accounts, "count": accounts.len() })
}

async fn run_accounts(
  method: &Method,
  headers: &HeaderMap,
  deps: &AccountsDeps<'_>,
) -> Result<Response<ResponseBody>, ApiError> {
  let supabase = deps
    .supabase
    .ok_or_else(|| ApiError::internal("config_error", "Missing NEXT_PUBLIC_SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY"))?;
  let user = require_session_user(supabase, headers).await?;
  let pool = deps
    .pool
    .ok_or_else(|| ApiError::internal("config_error", "Missing DATABASE_URL"))?;

  if method == Method::GET {
    let accounts = fetch_google_ads_accounts(pool, &user.id)
      .await
      .map_err(|e| ApiError::internal("Failed to load Google Ads accounts", e))?;
    return json_response(StatusCode::OK, accounts_body(&accounts))
      .map_err(|e| ApiError::internal("Failed to build response", e));
  }

  let google_ads = deps
    .google_ads
    .ok_or_else(|| ApiError::internal("config_error", "Missing GOOGLE_ADS_DEVELOPER_TOKEN"))?;
  let token = load_fresh_token(pool, deps.refresh_client, &user.id, chrono::Utc::now())
    .await
    .map_err(|e| ApiError::internal("Failed to load Google Ads token", e))?
    .ok_or_else(|| ApiError::Unauthorized("Google Ads is not connected".to_string()))?;

  let accounts = refresh_accounts(pool, google_ads, &user.id, &token.access_token)
    .await
    .map_err(|e| ApiError::upstream("Failed to refresh Google Ads accounts", e))?;
  json_response(StatusCode::OK, accounts_body(&accounts)).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_accounts(
  method: &Method,
  headers: &HeaderMap,
  deps: &AccountsDeps<'_>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET && method != Method::POST {
    return method_not_allowed();
  }
  respond(run_accounts(method, headers, deps).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let _ = req.into_body().collect().await?;

  let supabase = SupabaseConfig::from_env().ok();
  let google_ads = GoogleAdsConfig::from_env().ok();
  let refresh_client = google_refresh_client_from_env().ok();
  let deps = AccountsDeps {
    supabase: supabase.as_ref(),
    pool: get_pool_optional().await,
    google_ads: google_ads.as_ref(),
    refresh_client: refresh_client.as_ref(),
  };
  handle_accounts(&method, &headers, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
