use vercel_runtime::Error;

pub const DEFAULT_WEEKLY_LIMIT: i64 = 100;
const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_LOG_DIR: &str = "logs";

fn missing(name: &str) -> Error {
  Box::new(std::io::Error::other(format!("Missing {name}")))
}

/// Reads a variable, treating blank values as unset.
pub fn env_non_empty(name: &str) -> Option<String> {
  std::env::var(name)
    .ok()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

pub fn env_required(name: &str) -> Result<String, Error> {
  env_non_empty(name).ok_or_else(|| missing(name))
}

pub fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
  env_non_empty(name)
    .and_then(|v| v.parse().ok())
    .unwrap_or(default)
}

pub fn is_production() -> bool {
  env_non_empty("NODE_ENV").is_some_and(|v| v == "production")
}

/// Public origin of the deployment, without a trailing slash.
pub fn site_url() -> String {
  env_non_empty("NEXT_PUBLIC_SITE_URL")
    .unwrap_or_else(|| DEFAULT_SITE_URL.to_string())
    .trim_end_matches('/')
    .to_string()
}

pub fn weekly_report_limit() -> i64 {
  env_parse_or("REPORT_WEEKLY_LIMIT", DEFAULT_WEEKLY_LIMIT)
}

pub fn request_log_dir() -> std::path::PathBuf {
  std::path::PathBuf::from(env_non_empty("REQUEST_LOG_DIR").unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()))
}

pub fn database_url() -> Option<String> {
  env_non_empty("DATABASE_URL").or_else(|| env_non_empty("SUPABASE_DB_URL"))
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
  pub url: String,
  pub service_role_key: String,
}

impl SupabaseConfig {
  pub fn from_env() -> Result<Self, Error> {
    Ok(Self {
      url: env_required("NEXT_PUBLIC_SUPABASE_URL")?
        .trim_end_matches('/')
        .to_string(),
      service_role_key: env_required("SUPABASE_SERVICE_ROLE_KEY")?,
    })
  }
}

#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
  pub client_id: String,
  pub client_secret: String,
}

impl GoogleOAuthConfig {
  pub fn from_env() -> Result<Self, Error> {
    Ok(Self {
      client_id: env_required("GOOGLE_CLIENT_ID")?,
      client_secret: env_required("GOOGLE_CLIENT_SECRET")?,
    })
  }
}
