use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::OnceCell;
use vercel_runtime::Error;

use crate::config::database_url;
use crate::reports_cache::ReportCacheEntry;

static POOL: OnceCell<PgPool> = OnceCell::const_new();

async fn ensure_schema(pool: &PgPool) -> Result<(), Error> {
  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS google_ads_tokens (
        user_id TEXT PRIMARY KEY,
        access_token TEXT NOT NULL,
        refresh_token TEXT NULL,
        expires_at TIMESTAMPTZ NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS google_ads_accounts (
        user_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        account_name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (user_id, account_id)
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS report_usage (
        id BIGSERIAL PRIMARY KEY,
        user_id TEXT NOT NULL,
        report_type TEXT NOT NULL,
        account_id TEXT NULL,
        time_range TEXT NULL,
        campaign_id TEXT NULL,
        week_start DATE NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE INDEX IF NOT EXISTS idx_report_usage_week
      ON report_usage (user_id, week_start);
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE TABLE IF NOT EXISTS google_ads_reports_cache (
        cache_key TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        time_range TEXT NOT NULL,
        campaign_id TEXT NULL,
        report_type TEXT NOT NULL,
        data_only BOOLEAN NOT NULL DEFAULT FALSE,
        report_content TEXT NOT NULL,
        dashboard_data JSONB NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
      );
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query(
    r#"
      CREATE OR REPLACE FUNCTION cleanup_expired_reports_cache()
      RETURNS INTEGER
      LANGUAGE plpgsql
      AS $$
      DECLARE
        deleted INTEGER;
      BEGIN
        DELETE FROM google_ads_reports_cache WHERE expires_at <= now();
        GET DIAGNOSTICS deleted = ROW_COUNT;
        RETURN deleted;
      END;
      $$;
    "#,
  )
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn get_pool() -> Result<&'static PgPool, Error> {
  POOL
    .get_or_try_init(|| async {
      let url = database_url().ok_or_else(|| -> Error {
        Box::new(std::io::Error::other("Missing DATABASE_URL (or SUPABASE_DB_URL)"))
      })?;

      let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .map_err(|e| -> Error { Box::new(e) })?;

      ensure_schema(&pool).await?;
      Ok::<_, Error>(pool)
    })
    .await
}

/// Pool when a database is configured and reachable; `None` otherwise.
pub async fn get_pool_optional() -> Option<&'static PgPool> {
  database_url()?;
  match get_pool().await {
    Ok(pool) => Some(pool),
    Err(err) => {
      tracing::warn!(error = %err, "database unavailable");
      None
    }
  }
}

#[derive(Debug, Clone)]
pub struct GoogleAdsToken {
  pub user_id: String,
  pub access_token: String,
  pub refresh_token: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
}

pub async fn fetch_google_ads_token(pool: &PgPool, user_id: &str) -> Result<Option<GoogleAdsToken>, Error> {
  let row = sqlx::query_as::<_, (String, Option<String>, Option<DateTime<Utc>>)>(
    r#"
      SELECT access_token, refresh_token, expires_at
      FROM google_ads_tokens
      WHERE user_id = $1
      LIMIT 1;
    "#,
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(row.map(|(access_token, refresh_token, expires_at)| GoogleAdsToken {
    user_id: user_id.to_string(),
    access_token,
    refresh_token,
    expires_at,
  }))
}

/// Keeps the stored refresh token when `refresh_token` is `None`.
pub async fn upsert_google_ads_token(
  pool: &PgPool,
  user_id: &str,
  access_token: &str,
  refresh_token: Option<&str>,
  expires_at: Option<DateTime<Utc>>,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      INSERT INTO google_ads_tokens (user_id, access_token, refresh_token, expires_at)
      VALUES ($1, $2, $3, $4)
      ON CONFLICT (user_id) DO UPDATE SET
        access_token = EXCLUDED.access_token,
        refresh_token = COALESCE(EXCLUDED.refresh_token, google_ads_tokens.refresh_token),
        expires_at = EXCLUDED.expires_at,
        updated_at = now();
    "#,
  )
  .bind(user_id)
  .bind(access_token)
  .bind(refresh_token)
  .bind(expires_at)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

pub async fn update_google_ads_access_token(
  pool: &PgPool,
  user_id: &str,
  access_token: &str,
  refresh_token: Option<&str>,
  expires_at: Option<DateTime<Utc>>,
) -> Result<(), Error> {
  sqlx::query(
    r#"
      UPDATE google_ads_tokens
      SET access_token = $2,
          refresh_token = COALESCE($3, refresh_token),
          expires_at = $4,
          updated_at = now()
      WHERE user_id = $1;
    "#,
  )
  .bind(user_id)
  .bind(access_token)
  .bind(refresh_token)
  .bind(expires_at)
  .execute(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(())
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GoogleAdsAccountRow {
  pub account_id: String,
  pub account_name: String,
}

pub async fn fetch_google_ads_accounts(pool: &PgPool, user_id: &str) -> Result<Vec<GoogleAdsAccountRow>, Error> {
  let rows = sqlx::query_as::<_, (String, String)>(
    r#"
      SELECT account_id, account_name
      FROM google_ads_accounts
      WHERE user_id = $1
      ORDER BY account_name, account_id;
    "#,
  )
  .bind(user_id)
  .fetch_all(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(
    rows
      .into_iter()
      .map(|(account_id, account_name)| GoogleAdsAccountRow {
        account_id,
        account_name,
      })
      .collect(),
  )
}

pub async fn fetch_google_ads_account_ids(pool: &PgPool, user_id: &str) -> Result<Vec<String>, Error> {
  Ok(
    fetch_google_ads_accounts(pool, user_id)
      .await?
      .into_iter()
      .map(|a| a.account_id)
      .collect(),
  )
}

/// Replaces the user's whole account list in one transaction.
pub async fn replace_google_ads_accounts(
  pool: &PgPool,
  user_id: &str,
  accounts: &[GoogleAdsAccountRow],
) -> Result<(), Error> {
  let mut tx = pool.begin().await.map_err(|e| -> Error { Box::new(e) })?;

  sqlx::query("DELETE FROM google_ads_accounts WHERE user_id = $1;")
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  for account in accounts {
    sqlx::query(
      r#"
        INSERT INTO google_ads_accounts (user_id, account_id, account_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, account_id) DO UPDATE SET account_name = EXCLUDED.account_name;
      "#,
    )
    .bind(user_id)
    .bind(&account.account_id)
    .bind(&account.account_name)
    .execute(&mut *tx)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;
  }

  tx.commit().await.map_err(|e| -> Error { Box::new(e) })?;
  Ok(())
}

pub async fn count_report_usage_for_week(pool: &PgPool, user_id: &str, week_start: NaiveDate) -> Result<i64, Error> {
  let used = sqlx::query_scalar::<_, i64>(
    r#"
      SELECT COUNT(*)::BIGINT
      FROM report_usage
      WHERE user_id = $1 AND week_start = $2;
    "#,
  )
  .bind(user_id)
  .bind(week_start)
  .fetch_one(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(used)
}

pub async fn insert_report_usage(
  pool: &PgPool,
  user_id: &str,
  report_type: &str,
  account_id: Option<&str>,
  time_range: Option<&str>,
  campaign_id: Option<&str>,
  week_start: NaiveDate,
) -> Result<i64, Error> {
  let id = sqlx::query_scalar::<_, i64>(
    r#"
      INSERT INTO report_usage (user_id, report_type, account_id, time_range, campaign_id, week_start)
      VALUES ($1, $2, $3, $4, $5, $6)
      RETURNING id;
    "#,
  )
  .bind(user_id)
  .bind(report_type)
  .bind(account_id)
  .bind(time_range)
  .bind(campaign_id)
  .bind(week_start)
  .fetch_one(pool)
  .await
  .map_err(|e| -> Error { Box::new(e) })?;

  Ok(id)
}

type CacheRow = (
  String,
  String,
  String,
  String,
  Option<String>,
  String,
  bool,
  String,
  Option<serde_json::Value>,
  DateTime<Utc>,
  DateTime<Utc>,
);

pub async fn fetch_report_cache_entry(
  pool: &PgPool,
  cache_key: &str,
  user_id: &str,
) -> Result<Option<ReportCacheEntry>, sqlx::Error> {
  let row = sqlx::query_as::<_, CacheRow>(
    r#"
      SELECT cache_key, user_id, account_id, time_range, campaign_id, report_type,
             data_only, report_content, dashboard_data, expires_at, created_at
      FROM google_ads_reports_cache
      WHERE cache_key = $1 AND user_id = $2
      LIMIT 1;
    "#,
  )
  .bind(cache_key)
  .bind(user_id)
  .fetch_optional(pool)
  .await?;

  Ok(row.map(
    |(
      cache_key,
      user_id,
      account_id,
      time_range,
      campaign_id,
      report_type,
      data_only,
      report_content,
      dashboard_data,
      expires_at,
      created_at,
    )| ReportCacheEntry {
      cache_key,
      user_id,
      account_id,
      time_range,
      campaign_id,
      report_type,
      data_only,
      report_content,
      dashboard_data,
      expires_at,
      created_at,
    },
  ))
}

pub async fn delete_report_cache_entry(pool: &PgPool, cache_key: &str) -> Result<(), sqlx::Error> {
  sqlx::query("DELETE FROM google_ads_reports_cache WHERE cache_key = $1;")
    .bind(cache_key)
    .execute(pool)
    .await?;
  Ok(())
}

pub async fn upsert_report_cache_entry(pool: &PgPool, entry: &ReportCacheEntry) -> Result<(), sqlx::Error> {
  sqlx::query(
    r#"
      INSERT INTO google_ads_reports_cache (
        cache_key, user_id, account_id, time_range, campaign_id, report_type,
        data_only, report_content, dashboard_data, expires_at, created_at
      )
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
      ON CONFLICT (cache_key) DO UPDATE SET
        report_content = EXCLUDED.report_content,
        dashboard_data = EXCLUDED.dashboard_data,
        expires_at = EXCLUDED.expires_at,
        created_at = EXCLUDED.created_at;
    "#,
  )
  .bind(&entry.cache_key)
  .bind(&entry.user_id)
  .bind(&entry.account_id)
  .bind(&entry.time_range)
  .bind(entry.campaign_id.as_deref())
  .bind(&entry.report_type)
  .bind(entry.data_only)
  .bind(&entry.report_content)
  .bind(entry.dashboard_data.as_ref())
  .bind(entry.expires_at)
  .bind(entry.created_at)
  .execute(pool)
  .await?;
  Ok(())
}

pub async fn cleanup_expired_report_cache(pool: &PgPool) -> Result<u64, sqlx::Error> {
  let deleted = sqlx::query_scalar::<_, i32>("SELECT cleanup_expired_reports_cache();")
    .fetch_one(pool)
    .await?;
  Ok(deleted.max(0) as u64)
}
