use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

static REMOTE: OnceLock<reqwest::Client> = OnceLock::new();
static LOOPBACK: OnceLock<reqwest::Client> = OnceLock::new();

fn build_client(loopback: bool) -> Result<reqwest::Client, reqwest::Error> {
  let builder = reqwest::Client::builder()
    .connect_timeout(CONNECT_TIMEOUT)
    .timeout(REQUEST_TIMEOUT)
    .user_agent(concat!("roas-dog-rust/", env!("CARGO_PKG_VERSION")));
  let builder = if loopback { builder.no_proxy() } else { builder };
  builder.build()
}

fn targets_loopback(url: &str) -> bool {
  let Ok(parsed) = Url::parse(url) else {
    return false;
  };
  let Some(host) = parsed.host_str() else {
    return false;
  };
  let host = host.trim_start_matches('[').trim_end_matches(']');
  host.eq_ignore_ascii_case("localhost") || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Process-wide reqwest client for `url`. Loopback targets get a client that ignores
/// `HTTP(S)_PROXY`, so local route-to-route calls and test mocks are reached directly.
pub fn http_client_for_url(url: &str) -> Result<&'static reqwest::Client, reqwest::Error> {
  let loopback = targets_loopback(url);
  let cell = if loopback { &LOOPBACK } else { &REMOTE };
  if let Some(client) = cell.get() {
    return Ok(client);
  }
  let client = build_client(loopback)?;
  Ok(cell.get_or_init(|| client))
}
