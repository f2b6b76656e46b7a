use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;

use crate::db;

pub const CACHE_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCacheEntry {
  pub cache_key: String,
  pub user_id: String,
  pub account_id: String,
  pub time_range: String,
  pub campaign_id: Option<String>,
  pub report_type: String,
  pub data_only: bool,
  pub report_content: String,
  pub dashboard_data: Option<serde_json::Value>,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl ReportCacheEntry {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }
}

/// What a caller supplies to identify a cached report.
#[derive(Debug, Clone, Copy)]
pub struct CacheLookup<'a> {
  pub user_id: &'a str,
  pub account_id: &'a str,
  pub time_range: &'a str,
  pub campaign_id: Option<&'a str>,
  pub report_type: &'a str,
  pub data_only: bool,
}

impl CacheLookup<'_> {
  pub fn key(&self) -> String {
    generate_cache_key(
      self.user_id,
      self.account_id,
      self.time_range,
      self.campaign_id,
      self.report_type,
      self.data_only,
    )
  }
}

/// sha256 hex of `user:account:timeRange:campaign|null:reportType:data|report`.
pub fn generate_cache_key(
  user_id: &str,
  account_id: &str,
  time_range: &str,
  campaign_id: Option<&str>,
  report_type: &str,
  data_only: bool,
) -> String {
  let campaign = campaign_id.filter(|c| !c.is_empty()).unwrap_or("null");
  let mode = if data_only { "data" } else { "report" };
  let raw = format!("{user_id}:{account_id}:{time_range}:{campaign}:{report_type}:{mode}");
  format!("{:x}", Sha256::digest(raw.as_bytes()))
}

#[derive(Debug, Error)]
pub enum CacheTierError {
  #[error("cache table query failed: {0}")]
  Database(#[from] sqlx::Error),
  #[error("durable cache tier is not configured")]
  Unavailable,
}

/// Storage that survives process restarts.
#[async_trait]
pub trait DurableCacheTier: Send + Sync {
  async fn fetch(&self, cache_key: &str, user_id: &str) -> Result<Option<ReportCacheEntry>, CacheTierError>;
  async fn delete(&self, cache_key: &str) -> Result<(), CacheTierError>;
  async fn upsert(&self, entry: &ReportCacheEntry) -> Result<(), CacheTierError>;
  async fn cleanup_expired(&self) -> Result<u64, CacheTierError>;
}

/// `google_ads_reports_cache` table; `None` pool behaves as an always-failing tier.
pub struct PgCacheTier {
  pool: Option<&'static PgPool>,
}

impl PgCacheTier {
  pub fn new(pool: Option<&'static PgPool>) -> Self {
    Self { pool }
  }

  fn pool(&self) -> Result<&'static PgPool, CacheTierError> {
    self.pool.ok_or(CacheTierError::Unavailable)
  }
}

#[async_trait]
impl DurableCacheTier for PgCacheTier {
  async fn fetch(&self, cache_key: &str, user_id: &str) -> Result<Option<ReportCacheEntry>, CacheTierError> {
    Ok(db::fetch_report_cache_entry(self.pool()?, cache_key, user_id).await?)
  }

  async fn delete(&self, cache_key: &str) -> Result<(), CacheTierError> {
    Ok(db::delete_report_cache_entry(self.pool()?, cache_key).await?)
  }

  async fn upsert(&self, entry: &ReportCacheEntry) -> Result<(), CacheTierError> {
    Ok(db::upsert_report_cache_entry(self.pool()?, entry).await?)
  }

  async fn cleanup_expired(&self) -> Result<u64, CacheTierError> {
    Ok(db::cleanup_expired_report_cache(self.pool()?).await?)
  }
}

/// Process-local tier. Lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryTier {
  entries: Arc<Mutex<HashMap<String, ReportCacheEntry>>>,
}

impl MemoryTier {
  pub fn shared() -> MemoryTier {
    static SHARED: OnceLock<MemoryTier> = OnceLock::new();
    SHARED.get_or_init(MemoryTier::default).clone()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReportCacheEntry>> {
    self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn get(&self, cache_key: &str, user_id: &str) -> Option<ReportCacheEntry> {
    self.lock().get(cache_key).filter(|e| e.user_id == user_id).cloned()
  }

  pub fn insert(&self, entry: ReportCacheEntry) {
    self.lock().insert(entry.cache_key.clone(), entry);
  }

  pub fn remove(&self, cache_key: &str) {
    self.lock().remove(cache_key);
  }

  pub fn sweep_expired(&self, now: DateTime<Utc>) -> u64 {
    let mut map = self.lock();
    let before = map.len();
    map.retain(|_, e| !e.is_expired(now));
    (before - map.len()) as u64
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Durable tier first, in-process tier on miss or error.
pub struct ReportsCache<T: DurableCacheTier> {
  durable: T,
  memory: MemoryTier,
}

impl ReportsCache<PgCacheTier> {
  pub fn from_pool(pool: Option<&'static PgPool>) -> Self {
    Self::new(PgCacheTier::new(pool), MemoryTier::shared())
  }
}

impl<T: DurableCacheTier> ReportsCache<T> {
  pub fn new(durable: T, memory: MemoryTier) -> Self {
    Self { durable, memory }
  }

  pub async fn get(&self, lookup: &CacheLookup<'_>, now: DateTime<Utc>) -> Option<ReportCacheEntry> {
    let key = lookup.key();

    match self.durable.fetch(&key, lookup.user_id).await {
      Ok(Some(entry)) if entry.is_expired(now) => {
        if let Err(err) = self.durable.delete(&key).await {
          tracing::warn!(error = %err, "failed to delete expired cache entry");
        }
        self.memory.remove(&key);
        return None;
      }
      Ok(Some(entry)) => return Some(entry),
      Ok(None) => {}
      Err(err) => tracing::warn!(error = %err, "durable cache read failed, using in-process cache"),
    }

    let entry = self.memory.get(&key, lookup.user_id)?;
    if entry.is_expired(now) {
      self.memory.remove(&key);
      return None;
    }
    Some(entry)
  }

  pub async fn set(
    &self,
    lookup: &CacheLookup<'_>,
    report_content: &str,
    dashboard_data: Option<serde_json::Value>,
    now: DateTime<Utc>,
  ) -> ReportCacheEntry {
    let entry = ReportCacheEntry {
      cache_key: lookup.key(),
      user_id: lookup.user_id.to_string(),
      account_id: lookup.account_id.to_string(),
      time_range: lookup.time_range.to_string(),
      campaign_id: lookup.campaign_id.map(str::to_string),
      report_type: lookup.report_type.to_string(),
      data_only: lookup.data_only,
      report_content: report_content.to_string(),
      dashboard_data,
      expires_at: now + Duration::hours(CACHE_TTL_HOURS),
      created_at: now,
    };

    if let Err(err) = self.durable.upsert(&entry).await {
      tracing::warn!(error = %err, "durable cache write failed, storing in-process");
      self.memory.insert(entry.clone());
    }
    entry
  }

  /// Returns how many entries were removed.
  pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> u64 {
    let durable = match self.durable.cleanup_expired().await {
      Ok(n) => n,
      Err(err) => {
        tracing::warn!(error = %err, "cache cleanup rpc failed");
        0
      }
    };
    durable + self.memory.sweep_expired(now)
  }
}
