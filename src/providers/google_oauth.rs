use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken, TokenResponse, TokenUrl};
use vercel_runtime::Error;

use crate::config::GoogleOAuthConfig;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh-only client: no authorize URL is needed because sign-in goes through Supabase.
pub type GoogleRefreshClient =
  BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Clone)]
pub struct GoogleOAuthTokens {
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_in_seconds: Option<u64>,
}

pub fn google_refresh_client(cfg: &GoogleOAuthConfig, token_url: &str) -> Result<GoogleRefreshClient, Error> {
  if cfg.client_id.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("Missing GOOGLE_CLIENT_ID")) as Error);
  }
  if cfg.client_secret.trim().is_empty() {
    return Err(Box::new(std::io::Error::other("Missing GOOGLE_CLIENT_SECRET")) as Error);
  }

  let token_url = TokenUrl::new(token_url.to_string())
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  Ok(
    BasicClient::new(ClientId::new(cfg.client_id.clone()))
      .set_client_secret(ClientSecret::new(cfg.client_secret.clone()))
      .set_token_uri(token_url),
  )
}

pub fn google_refresh_client_from_env() -> Result<GoogleRefreshClient, Error> {
  google_refresh_client(&GoogleOAuthConfig::from_env()?, GOOGLE_TOKEN_URL)
}

pub async fn refresh_access_token(
  client: &GoogleRefreshClient,
  refresh_token: &str,
) -> Result<GoogleOAuthTokens, Error> {
  let http_client = oauth2::reqwest::ClientBuilder::new()
    .redirect(oauth2::reqwest::redirect::Policy::none())
    .build()
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  let token = client
    .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
    .request_async(&http_client)
    .await
    .map_err(|e| Box::new(std::io::Error::other(e.to_string())) as Error)?;

  Ok(GoogleOAuthTokens {
    access_token: token.access_token().secret().to_string(),
    refresh_token: token.refresh_token().map(|t| t.secret().to_string()),
    expires_in_seconds: token.expires_in().map(|d| d.as_secs()),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use http_body_util::{BodyExt, Full};
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn;
  use hyper::{Request, Response};
  use hyper_util::rt::TokioIo;
  use tokio::net::TcpListener;

  fn cfg() -> GoogleOAuthConfig {
    GoogleOAuthConfig {
      client_id: "cid".to_string(),
      client_secret: "secret".to_string(),
    }
  }

  #[test]
  fn rejects_blank_credentials() {
    let blank = GoogleOAuthConfig {
      client_id: " ".to_string(),
      client_secret: "s".to_string(),
    };
    assert!(google_refresh_client(&blank, GOOGLE_TOKEN_URL).is_err());
    assert!(google_refresh_client(&cfg(), GOOGLE_TOKEN_URL).is_ok());
  }

  #[tokio::test]
  async fn refresh_posts_refresh_token_grant() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let svc = service_fn(|req: Request<Incoming>| async move {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        let form = String::from_utf8_lossy(&body).to_string();
        assert!(form.contains("grant_type=refresh_token"));
        assert!(form.contains("refresh_token=r1"));
        Ok::<_, hyper::Error>(
          Response::builder()
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(
              br#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599}"#,
            )))
            .unwrap(),
        )
      });
      let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
    });

    let client = google_refresh_client(&cfg(), &format!("http://{addr}/token")).unwrap();
    let tokens = refresh_access_token(&client, "r1").await.unwrap();
    assert_eq!(tokens.access_token, "fresh");
    assert_eq!(tokens.refresh_token, None);
    assert_eq!(tokens.expires_in_seconds, Some(3599));
  }
}
