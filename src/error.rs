use hyper::StatusCode;
use thiserror::Error;
use vercel_runtime::{Error, Response, ResponseBody};

use crate::http::json_response;

/// Route-level failures, rendered as `{"error": ..., "details": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  Unauthorized(String),
  #[error("{0}")]
  NotFound(String),
  #[error("{message}")]
  QuotaExceeded {
    message: String,
    status: serde_json::Value,
  },
  /// An internal route we forwarded to failed.
  #[error("{message}")]
  Downstream { message: String, details: String },
  /// A third-party API (Gemini, Google Ads) failed or returned unusable output.
  #[error("{message}")]
  Upstream { message: String, details: String },
  #[error("{message}")]
  Internal { message: String, details: String },
}

impl ApiError {
  pub fn upstream(message: impl Into<String>, err: impl std::fmt::Display) -> Self {
    ApiError::Upstream {
      message: message.into(),
      details: err.to_string(),
    }
  }

  pub fn internal(message: impl Into<String>, err: impl std::fmt::Display) -> Self {
    ApiError::Internal {
      message: message.into(),
      details: err.to_string(),
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
      ApiError::Downstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
      ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn body(&self) -> serde_json::Value {
    match self {
      ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) | ApiError::NotFound(msg) => {
        serde_json::json!({"error": msg})
      }
      ApiError::QuotaExceeded { message, status } => {
        serde_json::json!({"error": message, "usage": status})
      }
      ApiError::Downstream { message, details }
      | ApiError::Upstream { message, details }
      | ApiError::Internal { message, details } => {
        serde_json::json!({"error": message, "details": details})
      }
    }
  }

  pub fn into_response(self) -> Result<Response<ResponseBody>, Error> {
    if self.status_code().is_server_error() {
      tracing::error!(status = self.status_code().as_u16(), error = %self, body = %self.body(), "request failed");
    }
    json_response(self.status_code(), self.body())
  }
}

/// Collapses a handler result into the response the runtime sends.
pub fn respond(result: Result<Response<ResponseBody>, ApiError>) -> Result<Response<ResponseBody>, Error> {
  match result {
    Ok(resp) => Ok(resp),
    Err(err) => err.into_response(),
  }
}

pub fn parse_json_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
  if body.is_empty() {
    return Err(ApiError::BadRequest("Request body is required".to_string()));
  }
  serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid json body: {e}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn taxonomy_maps_to_expected_statuses() {
    assert_eq!(ApiError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(ApiError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    assert_eq!(ApiError::upstream("gemini", "boom").status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(
      ApiError::Downstream {
        message: "m".into(),
        details: "d".into()
      }
      .status_code(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn upstream_body_carries_details() {
    let body = ApiError::upstream("Failed to generate report", "Gemini error (status 500)").body();
    assert_eq!(body["error"], "Failed to generate report");
    assert_eq!(body["details"], "Gemini error (status 500)");
  }

  #[test]
  fn parse_json_body_rejects_empty_and_malformed() {
    #[derive(serde::Deserialize)]
    struct Body {
      #[allow(dead_code)]
      a: i32,
    }
    assert!(matches!(parse_json_body::<Body>(b""), Err(ApiError::BadRequest(_))));
    assert!(matches!(parse_json_body::<Body>(b"{"), Err(ApiError::BadRequest(_))));
    assert!(parse_json_body::<Body>(br#"{"a":1}"#).is_ok());
  }
}
