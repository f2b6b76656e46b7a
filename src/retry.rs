use std::future::Future;
use std::time::Duration;

use crate::config::env_parse_or;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(2000),
      rate_limit_multiplier: 3,
    }
  }
}

impl RetryPolicy {
  pub fn from_env() -> Self {
    let base_ms = env_parse_or("GEMINI_RETRY_BASE_DELAY_MS", 2000u64);
    Self {
      base_delay: Duration::from_millis(base_ms),
      ..Self::default()
    }
  }

  /// Delay before attempt `failed_attempt + 1`: `base * 2^(failed_attempt - 1)`,
  /// multiplied again for rate-limit style errors.
  pub fn delay_for(&self, failed_attempt: u32, error_message: &str) -> Duration {
    let exp = failed_attempt.saturating_sub(1).min(16);
    let mut delay = self.base_delay.saturating_mul(1u32 << exp);
    if is_rate_limit_error(error_message) {
      delay = delay.saturating_mul(self.rate_limit_multiplier);
    }
    delay
  }
}

pub fn is_rate_limit_error(message: &str) -> bool {
  let lower = message.to_ascii_lowercase();
  ["rate", "quota", "limit"].iter().any(|needle| lower.contains(needle))
}

/// Runs `op` until it succeeds or `max_attempts` attempts have been made.
/// Returns the first success or the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
  E: std::fmt::Display,
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut attempt = 1;
  loop {
    match op(attempt).await {
      Ok(v) => return Ok(v),
      Err(err) if attempt >= max_attempts => {
        tracing::error!(attempt, error = %err, "giving up after final attempt");
        return Err(err);
      }
      Err(err) => {
        let delay = policy.delay_for(attempt, &err.to_string());
        tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "attempt failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn fast_policy() -> RetryPolicy {
    RetryPolicy {
      base_delay: Duration::from_millis(1),
      ..RetryPolicy::default()
    }
  }

  #[test]
  fn delays_double_and_triple_on_rate_limits() {
    let p = RetryPolicy::default();
    assert_eq!(p.delay_for(1, "boom"), Duration::from_millis(2000));
    assert_eq!(p.delay_for(2, "boom"), Duration::from_millis(4000));
    assert_eq!(p.delay_for(1, "Resource exhausted: QUOTA"), Duration::from_millis(6000));
    assert_eq!(p.delay_for(2, "Rate exceeded"), Duration::from_millis(12000));
  }

  #[test]
  fn rate_limit_detection_is_case_insensitive() {
    assert!(is_rate_limit_error("RATE_LIMIT_EXCEEDED"));
    assert!(is_rate_limit_error("daily Limit reached"));
    assert!(!is_rate_limit_error("internal error"));
  }

  #[tokio::test]
  async fn succeeds_on_third_attempt() {
    let calls = AtomicU32::new(0);
    let out: Result<&str, String> = retry_with_backoff(&fast_policy(), |_| {
      let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
      async move {
        if n < 3 {
          Err(format!("failure {n}"))
        } else {
          Ok("report")
        }
      }
    })
    .await;
    assert_eq!(out.unwrap(), "report");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn returns_last_error_after_three_attempts() {
    let calls = AtomicU32::new(0);
    let out: Result<(), String> = retry_with_backoff(&fast_policy(), |attempt| {
      calls.fetch_add(1, Ordering::SeqCst);
      async move { Err(format!("failure {attempt}")) }
    })
    .await;
    assert_eq!(out.unwrap_err(), "failure 3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }
}
