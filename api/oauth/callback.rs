use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, Uri};
use sqlx::PgPool;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::accounts::refresh_accounts;
use roas_dog_rust::config::{is_production, site_url, SupabaseConfig};
use roas_dog_rust::db::{get_pool_optional, upsert_google_ads_token};
use roas_dog_rust::http::{build_cookie, cookie_value, get_query_param, method_not_allowed, redirect_response, CookieSpec};
use roas_dog_rust::providers::google_ads::GoogleAdsConfig;
use roas_dog_rust::supabase_auth::{
  exchange_code_for_session, SupabaseSession, ACCESS_TOKEN_COOKIE, CODE_VERIFIER_COOKIE, REFRESH_TOKEN_COOKIE,
};
use roas_dog_rust::telemetry::init_tracing;
use roas_dog_rust::token_store::DEFAULT_TOKEN_LIFETIME_SECONDS;

const ERROR_AUTH_NAME: &str = "auth_error";
const SIGNIN_PATH: &str = "/signin";
const DEFAULT_SESSION_SECONDS: i64 = 3600;
const REFRESH_COOKIE_SECONDS: i64 = 60 * 60 * 24 * 30;
const GOOGLE_ADS_SCOPE: &str = "https://www.googleapis.com/auth/adwords";

struct CallbackDeps<'a> {
  supabase: Option<&'a SupabaseConfig>,
  pool: Option<&'a PgPool>,
  google_ads: Option<&'a GoogleAdsConfig>,
  site_url: &'a str,
  secure_cookies: bool,
}

/// Same-site relative paths only; anything else falls back to the post-login page.
fn post_login_path(redirect_uri: Option<&str>, register: bool) -> String {
  match redirect_uri.map(str::trim) {
    Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p.to_string(),
    _ if register => "/onboarding".to_string(),
    _ => "/dashboard".to_string(),
  }
}

fn flag(uri: &Uri, name: &str) -> bool {
  get_query_param(uri, name).is_some_and(|v| v == "true" || v == "1")
}

fn wants_google_ads(uri: &Uri) -> bool {
  flag(uri, "google_ads_enabled")
    || get_query_param(uri, "scope").is_some_and(|s| s.split_whitespace().any(|v| v == GOOGLE_ADS_SCOPE))
}

fn absolute(site_url: &str, path: &str) -> String {
  format!("{}{path}", site_url.trim_end_matches('/'))
}

fn failure_redirect(deps: &CallbackDeps<'_>, message: &str) -> Result<Response<ResponseBody>, Error> {
  tracing::warn!(reason = message, "oauth callback failed");
  let cookie = build_cookie(CookieSpec {
    name: ERROR_AUTH_NAME,
    value: message,
    max_age_seconds: 60,
    http_only: false,
    secure: deps.secure_cookies,
  });
  redirect_response(&absolute(deps.site_url, SIGNIN_PATH), &[cookie])
}

fn session_cookies(session: &SupabaseSession, secure: bool) -> Vec<String> {
  let mut cookies = vec![build_cookie(CookieSpec {
    name: ACCESS_TOKEN_COOKIE,
    value: &session.access_token,
    max_age_seconds: session.expires_in.unwrap_or(DEFAULT_SESSION_SECONDS),
    http_only: true,
    secure,
  })];
  if let Some(refresh) = session.refresh_token.as_deref() {
    cookies.push(build_cookie(CookieSpec {
      name: REFRESH_TOKEN_COOKIE,
      value: refresh,
      max_age_seconds: REFRESH_COOKIE_SECONDS,
      http_only: true,
      secure,
    }));
  }
  cookies.push(build_cookie(CookieSpec {
    name: CODE_VERIFIER_COOKIE,
    value: "",
    max_age_seconds: 0,
    http_only: true,
    secure,
  }));
  cookies
}

/// Stores the Google tokens and pulls the account list. Failures never block sign-in.
async fn connect_google_ads(deps: &CallbackDeps<'_>, session: &SupabaseSession) {
  let Some(provider_token) = session.provider_token.as_deref() else {
    tracing::warn!(user_id = %session.user.id, "google ads requested but no provider token returned");
    return;
  };
  let Some(pool) = deps.pool else {
    tracing::warn!(user_id = %session.user.id, "no database configured, google ads tokens not stored");
    return;
  };

  let expires_at = chrono::Utc::now() + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECONDS);
  if let Err(err) = upsert_google_ads_token(
    pool,
    &session.user.id,
    provider_token,
    session.provider_refresh_token.as_deref(),
    Some(expires_at),
  )
  .await
  {
    tracing::warn!(user_id = %session.user.id, error = %err, "failed to store google ads token");
    return;
  }

  let Some(google_ads) = deps.google_ads else {
    return;
  };
  if let Err(err) = refresh_accounts(pool, google_ads, &session.user.id, provider_token).await {
    tracing::warn!(user_id = %session.user.id, error = %err, "initial google ads account sync failed");
  }
}

async fn handle_callback(
  method: &Method,
  headers: &HeaderMap,
  uri: &Uri,
  deps: &CallbackDeps<'_>,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::GET {
    return method_not_allowed();
  }

  if let Some(provider_error) = get_query_param(uri, "error_description").or_else(|| get_query_param(uri, "error")) {
    return failure_redirect(deps, &provider_error);
  }
  let Some(code) = get_query_param(uri, "code").filter(|c| !c.is_empty()) else {
    return failure_redirect(deps, "Missing authorization code");
  };
  let Some(verifier) = cookie_value(headers, CODE_VERIFIER_COOKIE) else {
    return failure_redirect(deps, "Missing code verifier");
  };
  let Some(supabase) = deps.supabase else {
    return failure_redirect(deps, "Authentication is not configured");
  };

  let session = match exchange_code_for_session(supabase, &code, &verifier).await {
    Ok(session) => session,
    Err(err) => {
      tracing::warn!(error = %err, "code exchange failed");
      return failure_redirect(deps, "Could not complete sign in");
    }
  };
  tracing::info!(user_id = %session.user.id, "signed in");

  if wants_google_ads(uri) {
    connect_google_ads(deps, &session).await;
  }

  let redirect_uri = get_query_param(uri, "redirect_uri");
  let path = post_login_path(redirect_uri.as_deref(), flag(uri, "register"));
  redirect_response(&absolute(deps.site_url, &path), &session_cookies(&session, deps.secure_cookies))
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let uri = req.uri().clone();
  let _ = req.into_body().collect().await?;

  let supabase = SupabaseConfig::from_env().ok();
  let google_ads = GoogleAdsConfig::from_env().ok();
  let site = site_url();
  let deps = CallbackDeps {
    supabase: supabase.as_ref(),
    pool: get_pool_optional().await,
    google_ads: google_ads.as_ref(),
    site_url: &site,
    secure_cookies: is_production(),
  };
  handle_callback(&method, &headers, &uri, &deps).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  run(service_fn(handler)).await
}
