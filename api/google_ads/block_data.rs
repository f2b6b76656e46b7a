use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use vercel_runtime::{run, service_fn, Error, Request, Response, ResponseBody};

use roas_dog_rust::block_router::resolve_block_id;
use roas_dog_rust::config::site_url;
use roas_dog_rust::error::{parse_json_body, respond, ApiError};
use roas_dog_rust::http::{json_response, method_not_allowed, raw_cookie_header};
use roas_dog_rust::internal_api::{InternalApiClient, MetricSource};
use roas_dog_rust::metrics::MetricRequest;
use roas_dog_rust::telemetry::init_tracing;

/// The metric body is forwarded as-is; only `blockId` is consumed here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDataRequest {
  #[serde(default)]
  block_id: Option<String>,
  #[serde(flatten)]
  metric: MetricRequest,
}

fn required(v: &str) -> Option<&str> {
  Some(v.trim()).filter(|s| !s.is_empty())
}

async fn route_block<S: MetricSource + ?Sized>(
  source: &S,
  body: Bytes,
) -> Result<Response<ResponseBody>, ApiError> {
  let parsed: BlockDataRequest = parse_json_body(&body)?;

  let (Some(_), Some(account_id), Some(block_id)) = (
    required(&parsed.metric.access_token),
    required(&parsed.metric.account_id),
    parsed.block_id.as_deref().and_then(required),
  ) else {
    return Err(ApiError::BadRequest(
      "accessToken, accountId and blockId are required".to_string(),
    ));
  };

  let endpoint = resolve_block_id(block_id).map_err(|e| ApiError::Internal {
    message: e.to_string(),
    details: e.to_string(),
  })?;

  tracing::info!(block_id, endpoint = endpoint.path(), account_id, "forwarding block request");
  let data = source
    .fetch_metric(endpoint, &parsed.metric)
    .await
    .map_err(|e| ApiError::Downstream {
      message: format!("Failed to fetch block data: {e}"),
      details: e.to_string(),
    })?;

  json_response(StatusCode::OK, data).map_err(|e| ApiError::internal("Failed to build response", e))
}

async fn handle_block_data(
  method: &Method,
  headers: &HeaderMap,
  body: Bytes,
  base_url: &str,
) -> Result<Response<ResponseBody>, Error> {
  if method != Method::POST {
    return method_not_allowed();
  }
  let source = InternalApiClient::new(base_url, raw_cookie_header(headers));
  respond(route_block(&source, body).await)
}

async fn handler(req: Request) -> Result<Response<ResponseBody>, Error> {
  let method = req.method().clone();
  let headers = req.headers().clone();
  let bytes = req.into_body().collect().await?.to_bytes();
  handle_block_data(&method, &headers, bytes, &site_url()).await
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
  use tokio::net::TcpListener;

  async fn serve_one(status: StatusCode, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let svc = hyper_service_fn(move |req: hyper::Request<Incoming>| async move {
        assert_eq!(req.uri().path(), "/api/google-ads/campaigns");
        assert_eq!(req.headers().get("cookie").unwrap(), "sb-access-token=abc");
        let payload: serde_json::Value =
          serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes()).unwrap();
        assert_eq!(payload["timeRange"], "LAST_7_DAYS");
        assert!(payload.get("blockId").is_none());
        Ok::<_, hyper::Error>(
          hyper::Response::builder()
            .status(status)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap(),
        )
      });
      let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
    });
    format!("http://{addr}")
  }

  async fn serve_capture() -> (String, tokio::sync::oneshot::Receiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let tx = std::sync::Mutex::new(Some(tx));
      let svc = hyper_service_fn(move |req: hyper::Request<Incoming>| {
        let tx = tx.lock().unwrap().take();
        async move {
          let payload: serde_json::Value =
            serde_json::from_slice(&req.into_body().collect().await.unwrap().to_bytes()).unwrap();
          if let Some(tx) = tx {
            let _ = tx.send(payload);
          }
          Ok::<_, hyper::Error>(
            hyper::Response::builder()
              .status(StatusCode::OK)
              .body(Full::new(Bytes::from_static(b"{\"campaigns\":[]}")))
              .unwrap(),
          )
        }
      });
      let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
    });
    (format!("http://{addr}"), rx)
  }

  fn headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("cookie", "sb-access-token=abc".parse().unwrap());
    headers
  }

  async fn body_json(response: Response<ResponseBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
  }

  const BLOCK1: &str =
    r#"{"accessToken":"tok","accountId":"123","blockId":"block1","timeRange":"LAST_7_DAYS"}"#;

  #[tokio::test]
  async fn forwards_to_resolved_endpoint() {
    let base = serve_one(StatusCode::OK, r#"{"campaigns":[],"accountId":"123"}"#).await;
    let response = handle_block_data(&Method::POST, &headers(), Bytes::from(BLOCK1), &base)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["accountId"], "123");
  }

  #[tokio::test]
  async fn forwards_quota_opt_out_and_login_customer() {
    let (base, rx) = serve_capture().await;
    let body = Bytes::from(
      r#"{"accessToken":"tok","accountId":"123","blockId":"block1","skipLimitCheck":true,"loginCustomerId":"999"}"#,
    );
    let response = handle_block_data(&Method::POST, &headers(), body, &base).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let forwarded = rx.await.unwrap();
    assert_eq!(forwarded["accessToken"], "tok");
    assert_eq!(forwarded["accountId"], "123");
    assert_eq!(forwarded["skipLimitCheck"], true);
    assert_eq!(forwarded["loginCustomerId"], "999");
    assert!(forwarded.get("blockId").is_none());
  }

  #[tokio::test]
  async fn downstream_failure_surfaces_status() {
    let base = serve_one(StatusCode::INTERNAL_SERVER_ERROR, "google ads exploded").await;
    let response = handle_block_data(&Method::POST, &headers(), Bytes::from(BLOCK1), &base)
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("500"));
    assert!(error.contains("google ads exploded"));
  }

  #[tokio::test]
  async fn missing_fields_are_rejected() {
    let body = Bytes::from(r#"{"accessToken":"tok","blockId":"block1"}"#);
    let response = handle_block_data(&Method::POST, &headers(), body, "http://127.0.0.1:9")
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn unknown_block_is_a_server_error() {
    let body = Bytes::from(r#"{"accessToken":"tok","accountId":"1","blockId":"block404"}"#);
    let response = handle_block_data(&Method::POST, &headers(), body, "http://127.0.0.1:9")
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "Unknown block ID: block404");
  }

  #[tokio::test]
  async fn rejects_get() {
    let response = handle_block_data(&Method::GET, &headers(), Bytes::new(), "http://127.0.0.1:9")
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
  }
}
