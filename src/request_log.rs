use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::config::request_log_dir;

pub const DEDUPE_WINDOW: Duration = Duration::from_secs(10);

/// How two requests are judged to be the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
  PromptLength(usize),
  PromptHash(String),
}

impl Fingerprint {
  pub fn length_of(prompt: &str) -> Self {
    Fingerprint::PromptLength(prompt.len())
  }

  pub fn hash_of(prompt: &str) -> Self {
    Fingerprint::PromptHash(format!("{:x}", Sha256::digest(prompt.as_bytes())))
  }

  fn as_value(&self) -> Value {
    match self {
      Fingerprint::PromptLength(n) => serde_json::json!({ "prompt_length": n }),
      Fingerprint::PromptHash(h) => serde_json::json!({ "prompt_sha256": h }),
    }
  }
}

/// Diagnostic JSON-lines log, one file per route per day.
pub struct RequestLog {
  dir: PathBuf,
  recent: Mutex<HashMap<(String, Fingerprint), Instant>>,
}

impl RequestLog {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      recent: Mutex::new(HashMap::new()),
    }
  }

  pub fn global() -> &'static RequestLog {
    static GLOBAL: OnceLock<RequestLog> = OnceLock::new();
    GLOBAL.get_or_init(|| RequestLog::new(request_log_dir()))
  }

  pub fn file_path(&self, route: &str, now: DateTime<Utc>) -> PathBuf {
    self.dir.join(format!("{route}-{}.log", now.format("%Y-%m-%d")))
  }

  /// Records the fingerprint and returns false when it was already seen within the window.
  pub fn should_write(&self, route: &str, fingerprint: &Fingerprint, at: Instant) -> bool {
    let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
    recent.retain(|_, seen| at.saturating_duration_since(*seen) < DEDUPE_WINDOW);
    let key = (route.to_string(), fingerprint.clone());
    if recent.contains_key(&key) {
      return false;
    }
    recent.insert(key, at);
    true
  }

  /// Best-effort: I/O errors are logged and dropped.
  pub async fn record(&self, route: &str, fingerprint: Fingerprint, details: Value) {
    if !self.should_write(route, &fingerprint, Instant::now()) {
      tracing::debug!(route, "skipping duplicate request log entry");
      return;
    }
    let now = Utc::now();
    let line = serde_json::json!({
      "timestamp": now.to_rfc3339(),
      "route": route,
      "fingerprint": fingerprint.as_value(),
      "details": details,
    });
    if let Err(err) = append_line(&self.dir, &self.file_path(route, now), &line.to_string()).await {
      tracing::warn!(route, error = %err, "request log write failed");
    }
  }
}

async fn append_line(dir: &Path, path: &Path, line: &str) -> std::io::Result<()> {
  tokio::fs::create_dir_all(dir).await?;
  let mut file = tokio::fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .await?;
  file.write_all(line.as_bytes()).await?;
  file.write_all(b"\n").await?;
  file.flush().await
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("roas-request-log-{name}-{}", std::process::id()))
  }

  #[test]
  fn duplicate_within_window_is_suppressed() {
    let log = RequestLog::new(temp_dir("dedupe"));
    let t0 = Instant::now();
    let fp = Fingerprint::length_of("hello");
    assert!(log.should_write("proxy-openai-weekly", &fp, t0));
    assert!(!log.should_write("proxy-openai-weekly", &fp, t0 + Duration::from_secs(9)));
    assert!(log.should_write("proxy-openai-budget", &fp, t0 + Duration::from_secs(9)));
    assert!(log.should_write("proxy-openai-weekly", &fp, t0 + Duration::from_secs(11)));
  }

  #[test]
  fn hash_fingerprint_distinguishes_same_length_prompts() {
    assert_eq!(Fingerprint::length_of("abc"), Fingerprint::length_of("xyz"));
    assert_ne!(Fingerprint::hash_of("abc"), Fingerprint::hash_of("xyz"));
  }

  #[test]
  fn file_is_named_by_route_and_day() {
    let log = RequestLog::new("/tmp/logs");
    let now = Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap();
    assert_eq!(
      log.file_path("proxy-openai", now),
      PathBuf::from("/tmp/logs/proxy-openai-2026-04-02.log")
    );
  }

  #[tokio::test]
  async fn record_creates_directory_and_appends_once() {
    let dir = temp_dir("append");
    let _ = std::fs::remove_dir_all(&dir);
    let log = RequestLog::new(&dir);
    log.record("proxy-openai", Fingerprint::hash_of("p"), serde_json::json!({"a": 1})).await;
    log.record("proxy-openai", Fingerprint::hash_of("p"), serde_json::json!({"a": 2})).await;

    let path = log.file_path("proxy-openai", Utc::now());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 1);
    let entry: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["details"]["a"], 1);
    let _ = std::fs::remove_dir_all(&dir);
  }
}
