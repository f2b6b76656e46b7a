use chrono::Utc;
use vercel_runtime::Error;

use roas_dog_rust::accounts::refresh_accounts;
use roas_dog_rust::db::{fetch_google_ads_accounts, get_pool};
use roas_dog_rust::metrics::{run_metric_report, MetricEndpoint, MetricRequest};
use roas_dog_rust::providers::google_ads::GoogleAdsConfig;
use roas_dog_rust::providers::google_oauth::google_refresh_client_from_env;
use roas_dog_rust::telemetry::init_tracing;
use roas_dog_rust::token_store::load_fresh_token;

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  init_tracing();
  let args: Vec<String> = std::env::args().collect();

  let user_id = parse_flag_value(&args, "--user-id")
    .or_else(|| parse_flag_value(&args, "--user"))
    .unwrap_or_default();
  if user_id.trim().is_empty() {
    eprintln!("Missing required --user-id");
    return Ok(());
  }
  let user_id = user_id.trim();

  let pool = get_pool().await?;
  let refresh_client = google_refresh_client_from_env().ok();
  let Some(token) = load_fresh_token(pool, refresh_client.as_ref(), user_id, Utc::now()).await? else {
    eprintln!("No Google Ads token stored for this user.");
    return Ok(());
  };

  let cfg = GoogleAdsConfig::from_env()?;
  let accounts = if args.iter().any(|a| a == "--sync") {
    refresh_accounts(pool, &cfg, user_id, &token.access_token).await?
  } else {
    fetch_google_ads_accounts(pool, user_id).await?
  };

  println!("ok=true accounts_count={}", accounts.len());
  for account in &accounts {
    println!("- {}  {}", account.account_id, account.account_name);
  }

  // --metric campaigns --account-id 1234567890 prints one report.
  let Some(metric) = parse_flag_value(&args, "--metric") else {
    return Ok(());
  };
  let endpoint = MetricEndpoint::from_path(&metric)
    .ok_or_else(|| Box::new(std::io::Error::other(format!("unknown metric: {metric}"))) as Error)?;
  let account_id = parse_flag_value(&args, "--account-id")
    .or_else(|| accounts.first().map(|a| a.account_id.clone()))
    .ok_or_else(|| Box::new(std::io::Error::other("no account to query")) as Error)?;

  let req = MetricRequest {
    access_token: token.access_token.clone(),
    account_id,
    time_range: parse_flag_value(&args, "--time-range"),
    skip_limit_check: true,
    ..MetricRequest::default()
  };
  let report = run_metric_report(&cfg, endpoint, &req, Utc::now().date_naive())
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  let rows = report
    .get(endpoint.response_key())
    .and_then(|v| v.as_array())
    .map_or(0, Vec::len);
  println!("metric={} rows={rows}", endpoint.path());
  println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());

  Ok(())
}
