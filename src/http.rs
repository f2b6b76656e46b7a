use hyper::{HeaderMap, StatusCode, Uri};
use vercel_runtime::{Error, Response, ResponseBody};

pub fn json_response(status: StatusCode, value: serde_json::Value) -> Result<Response<ResponseBody>, Error> {
  Ok(
    Response::builder()
      .status(status)
      .header("content-type", "application/json; charset=utf-8")
      .body(ResponseBody::from(value))?,
  )
}

pub fn method_not_allowed() -> Result<Response<ResponseBody>, Error> {
  json_response(
    StatusCode::METHOD_NOT_ALLOWED,
    serde_json::json!({"error": "method_not_allowed"}),
  )
}

/// 302 to `location`, attaching each entry of `cookies` as its own `set-cookie` header.
pub fn redirect_response(location: &str, cookies: &[String]) -> Result<Response<ResponseBody>, Error> {
  let mut builder = Response::builder()
    .status(StatusCode::FOUND)
    .header("location", location)
    .header("cache-control", "no-store");
  for cookie in cookies {
    builder = builder.header("set-cookie", cookie.as_str());
  }
  Ok(builder.body(ResponseBody::from(String::new()))?)
}

pub fn bearer_token(header_value: Option<&str>) -> Option<&str> {
  let value = header_value?;
  value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))
}

fn decode_hex_digit(b: u8) -> Option<u8> {
  match b {
    b'0'..=b'9' => Some(b - b'0'),
    b'a'..=b'f' => Some(b - b'a' + 10),
    b'A'..=b'F' => Some(b - b'A' + 10),
    _ => None,
  }
}

/// `application/x-www-form-urlencoded` decoding: `+` is a space.
pub fn percent_decode(input: &str) -> Option<String> {
  decode_percent(input, true)
}

/// Cookie values keep `+` literally.
fn decode_cookie_value(input: &str) -> Option<String> {
  decode_percent(input, false)
}

fn decode_percent(input: &str, plus_as_space: bool) -> Option<String> {
  let bytes = input.as_bytes();
  let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'%' if i + 2 < bytes.len() => {
        let hi = decode_hex_digit(bytes[i + 1])?;
        let lo = decode_hex_digit(bytes[i + 2])?;
        out.push((hi << 4) | lo);
        i += 3;
      }
      b'+' if plus_as_space => {
        out.push(b' ');
        i += 1;
      }
      b => {
        out.push(b);
        i += 1;
      }
    }
  }
  String::from_utf8(out).ok()
}

pub fn percent_encode(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for b in input.bytes() {
    match b {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
      _ => out.push_str(&format!("%{b:02X}")),
    }
  }
  out
}

pub fn get_query_param(uri: &Uri, key: &str) -> Option<String> {
  let query = uri.query()?;
  for part in query.split('&') {
    let mut it = part.splitn(2, '=');
    let k = it.next().unwrap_or("");
    if k != key {
      continue;
    }
    let v = it.next().unwrap_or("");
    return percent_decode(v).or_else(|| Some(v.to_string()));
  }
  None
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get_all("cookie")
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(k, _)| *k == name)
    .map(|(_, v)| decode_cookie_value(v).unwrap_or_else(|| v.to_string()))
    .filter(|v| !v.is_empty())
}

/// Raw inbound `cookie` header, forwarded verbatim on internal route calls.
pub fn raw_cookie_header(headers: &HeaderMap) -> Option<String> {
  headers
    .get("cookie")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string)
    .filter(|v| !v.is_empty())
}

pub struct CookieSpec<'a> {
  pub name: &'a str,
  pub value: &'a str,
  pub max_age_seconds: i64,
  pub http_only: bool,
  pub secure: bool,
}

pub fn build_cookie(spec: CookieSpec<'_>) -> String {
  let mut out = format!(
    "{}={}; Path=/; Max-Age={}; SameSite=Lax",
    spec.name,
    percent_encode(spec.value),
    spec.max_age_seconds
  );
  if spec.http_only {
    out.push_str("; HttpOnly");
  }
  if spec.secure {
    out.push_str("; Secure");
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn query_param_is_percent_decoded() {
    let uri: Uri = "/api/oauth/callback?code=a%2Fb&redirect_uri=%2Fdashboard%3Ftab%3D1&scope=x+y"
      .parse()
      .unwrap();
    assert_eq!(get_query_param(&uri, "code").as_deref(), Some("a/b"));
    assert_eq!(get_query_param(&uri, "redirect_uri").as_deref(), Some("/dashboard?tab=1"));
    assert_eq!(get_query_param(&uri, "scope").as_deref(), Some("x y"));
    assert_eq!(get_query_param(&uri, "missing"), None);
  }

  #[test]
  fn cookie_value_finds_named_cookie() {
    let mut headers = HeaderMap::new();
    headers.insert("cookie", "a=1; sb-access-token=tok%20en; b=2".parse().unwrap());
    assert_eq!(cookie_value(&headers, "sb-access-token").as_deref(), Some("tok en"));
    assert_eq!(cookie_value(&headers, "b").as_deref(), Some("2"));
    assert_eq!(cookie_value(&headers, "c"), None);
  }

  #[test]
  fn cookie_value_keeps_plus_signs() {
    let mut headers = HeaderMap::new();
    headers.insert("cookie", "sb-access-token=eyJ+ab/c%3D; pkce=x+y".parse().unwrap());
    assert_eq!(cookie_value(&headers, "sb-access-token").as_deref(), Some("eyJ+ab/c="));
    assert_eq!(cookie_value(&headers, "pkce").as_deref(), Some("x+y"));
  }

  #[test]
  fn build_cookie_sets_flags() {
    let cookie = build_cookie(CookieSpec {
      name: "sb-refresh-token",
      value: "r/1",
      max_age_seconds: 60,
      http_only: true,
      secure: true,
    });
    assert_eq!(
      cookie,
      "sb-refresh-token=r%2F1; Path=/; Max-Age=60; SameSite=Lax; HttpOnly; Secure"
    );
  }

  #[test]
  fn bearer_token_accepts_both_cases() {
    assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
    assert_eq!(bearer_token(Some("bearer abc")), Some("abc"));
    assert_eq!(bearer_token(Some("Basic abc")), None);
  }
}
