use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::config::{env_non_empty, env_parse_or};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("GEMINI_API_KEY is not configured")]
    NotConfigured,
    #[error("Gemini error (status {status}): {body}")]
    Status { status: u16, body: String },
    #[error("Gemini transport error: {0}")]
    Transport(String),
    #[error("invalid json response: {0}")]
    InvalidResponse(String),
    #[error("Gemini returned no text")]
    EmptyResponse,
}

#[derive(Debug, Clone)]
pub struct GeminiUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base_url: String,
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    /// `None` when no API key is present in the environment.
    pub fn from_env_optional() -> Option<Self> {
        let api_key = env_non_empty("GEMINI_API_KEY")?;
        Some(Self {
            api_key,
            model: env_non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base_url: env_non_empty("GEMINI_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            max_output_tokens: env_parse_or("GEMINI_MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS),
        })
    }

    pub fn from_env() -> Result<Self, GeminiError> {
        Self::from_env_optional().ok_or(GeminiError::NotConfigured)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
    /// Set to `application/json` for the schema-bound routes.
    pub response_mime_type: Option<&'static str>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            response_mime_type: None,
        }
    }
}

impl GenerateOptions {
    pub fn json() -> Self {
        Self {
            temperature: 0.2,
            response_mime_type: Some("application/json"),
        }
    }
}

fn model_path(model: &str) -> String {
    let m = model.trim();
    if m.starts_with("models/") {
        m.to_string()
    } else {
        format!("models/{m}")
    }
}

fn build_url(cfg: &GeminiConfig) -> String {
    let base = cfg.api_base_url.trim_end_matches('/');
    format!("{base}/{}:generateContent", model_path(&cfg.model))
}

fn build_request_json(cfg: &GeminiConfig, system: &str, user: &str, options: &GenerateOptions) -> Value {
    let mut generation_config = serde_json::json!({
      "temperature": options.temperature,
      "maxOutputTokens": cfg.max_output_tokens
    });
    if let Some(mime) = options.response_mime_type {
        generation_config["responseMimeType"] = Value::String(mime.to_string());
    }
    serde_json::json!({
      "systemInstruction": {"parts":[{"text": system}]},
      "contents":[{"role":"user","parts":[{"text": user}]}],
      "generationConfig": generation_config
    })
}

fn extract_text_from_response_json(json: &Value) -> String {
    let mut out = String::new();
    let candidates = json
        .get("candidates")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for cand in candidates {
        let parts = cand
            .get("content")
            .and_then(|v| v.get("parts"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                out.push_str(text);
            }
        }
    }
    out
}

fn extract_usage(json: &Value) -> Option<GeminiUsage> {
    let usage = json.get("usageMetadata")?;
    let prompt = usage.get("promptTokenCount")?.as_i64()?;
    let completion = usage
        .get("candidatesTokenCount")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    Some(GeminiUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
    })
}

fn transport(e: impl std::fmt::Display) -> GeminiError {
    GeminiError::Transport(e.to_string())
}

/// One `generateContent` call. The API key travels in the `x-goog-api-key` header.
pub async fn generate_text(
    cfg: &GeminiConfig,
    system: &str,
    user: &str,
    options: &GenerateOptions,
) -> Result<String, GeminiError> {
    let payload = build_request_json(cfg, system, user, options);
    let body = serde_json::to_vec(&payload).map_err(transport)?;

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(transport)?
        .https_or_http()
        .enable_http1()
        .build();
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(connector);

    let req = Request::builder()
        .method(Method::POST)
        .uri(build_url(cfg))
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .header("x-goog-api-key", cfg.api_key.as_str())
        .body(Full::new(Bytes::from(body)))
        .map_err(transport)?;

    let resp = client.request(req).await.map_err(transport)?;

    let status = resp.status();
    let body_bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(transport)?
        .to_bytes();

    if status != StatusCode::OK {
        return Err(GeminiError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body_bytes).to_string(),
        });
    }

    let json: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| GeminiError::InvalidResponse(e.to_string()))?;

    if let Some(usage) = extract_usage(&json) {
        tracing::debug!(
            model = %cfg.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "gemini usage"
        );
    }

    let text = extract_text_from_response_json(&json);
    if text.trim().is_empty() {
        return Err(GeminiError::EmptyResponse);
    }
    Ok(text)
}
