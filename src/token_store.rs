use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use vercel_runtime::Error;

use crate::db::{self, GoogleAdsToken};
use crate::providers::google_oauth::{refresh_access_token, GoogleOAuthTokens, GoogleRefreshClient};

pub const REFRESH_BUFFER_MINUTES: i64 = 5;
/// Assumed lifetime when Google omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// True when the token expires within the buffer. A token with no recorded expiry is refreshed.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
  match expires_at {
    Some(exp) => exp - now <= Duration::minutes(REFRESH_BUFFER_MINUTES),
    None => true,
  }
}

/// Stored token merged with a refresh result; Google usually omits the refresh token on refresh.
pub fn apply_refresh(stored: &GoogleAdsToken, refreshed: &GoogleOAuthTokens, now: DateTime<Utc>) -> GoogleAdsToken {
  GoogleAdsToken {
    user_id: stored.user_id.clone(),
    access_token: refreshed.access_token.clone(),
    refresh_token: refreshed
      .refresh_token
      .clone()
      .or_else(|| stored.refresh_token.clone()),
    expires_at: Some(
      now
        + Duration::seconds(
          refreshed
            .expires_in_seconds
            .map_or(DEFAULT_TOKEN_LIFETIME_SECONDS, |secs| secs as i64),
        ),
    ),
  }
}

/// Loads the user's Google Ads token and refreshes it when close to expiry.
/// A failed refresh is logged and the stored token is returned as-is.
pub async fn load_fresh_token(
  pool: &PgPool,
  client: Option<&GoogleRefreshClient>,
  user_id: &str,
  now: DateTime<Utc>,
) -> Result<Option<GoogleAdsToken>, Error> {
  let Some(stored) = db::fetch_google_ads_token(pool, user_id).await? else {
    return Ok(None);
  };

  if !needs_refresh(stored.expires_at, now) {
    return Ok(Some(stored));
  }
  let (Some(client), Some(refresh_token)) = (client, stored.refresh_token.as_deref()) else {
    tracing::warn!(user_id, "google ads token near expiry but cannot be refreshed");
    return Ok(Some(stored));
  };

  match refresh_access_token(client, refresh_token).await {
    Ok(refreshed) => {
      let token = apply_refresh(&stored, &refreshed, now);
      if let Err(err) = db::update_google_ads_access_token(
        pool,
        user_id,
        &token.access_token,
        refreshed.refresh_token.as_deref(),
        token.expires_at,
      )
      .await
      {
        tracing::warn!(user_id, error = %err, "failed to persist refreshed google ads token");
      }
      tracing::info!(user_id, "refreshed google ads token");
      Ok(Some(token))
    }
    Err(err) => {
      tracing::warn!(user_id, error = %err, "google ads token refresh failed, using stored token");
      Ok(Some(stored))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
  }

  #[test]
  fn refresh_window_is_five_minutes() {
    assert!(needs_refresh(Some(now() + Duration::minutes(4)), now()));
    assert!(needs_refresh(Some(now() + Duration::minutes(5)), now()));
    assert!(needs_refresh(Some(now() - Duration::hours(1)), now()));
    assert!(!needs_refresh(Some(now() + Duration::minutes(6)), now()));
    assert!(needs_refresh(None, now()));
  }

  #[test]
  fn apply_refresh_keeps_stored_refresh_token() {
    let stored = GoogleAdsToken {
      user_id: "u".into(),
      access_token: "old".into(),
      refresh_token: Some("r1".into()),
      expires_at: Some(now()),
    };
    let refreshed = GoogleOAuthTokens {
      access_token: "new".into(),
      refresh_token: None,
      expires_in_seconds: Some(3600),
    };
    let merged = apply_refresh(&stored, &refreshed, now());
    assert_eq!(merged.access_token, "new");
    assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
    assert_eq!(merged.expires_at, Some(now() + Duration::hours(1)));
  }

  #[test]
  fn missing_expiry_defaults_to_an_hour() {
    let stored = GoogleAdsToken {
      user_id: "u".into(),
      access_token: "old".into(),
      refresh_token: Some("r1".into()),
      expires_at: None,
    };
    let refreshed = GoogleOAuthTokens {
      access_token: "new".into(),
      refresh_token: Some("r2".into()),
      expires_in_seconds: None,
    };
    let merged = apply_refresh(&stored, &refreshed, now());
    assert_eq!(merged.refresh_token.as_deref(), Some("r2"));
    assert_eq!(merged.expires_at, Some(now() + Duration::hours(1)));
    assert!(!needs_refresh(merged.expires_at, now() + Duration::minutes(30)));
  }
}
