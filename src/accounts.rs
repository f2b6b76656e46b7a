use sqlx::PgPool;
use vercel_runtime::Error;

use crate::db::{self, GoogleAdsAccountRow};
pub use crate::providers::google_ads::parse_customer_resource_name;
use crate::providers::google_ads::{self, GoogleAdsConfig};

/// Fetches every accessible customer, names it when possible, and replaces the stored list.
pub async fn refresh_accounts(
  pool: &PgPool,
  cfg: &GoogleAdsConfig,
  user_id: &str,
  access_token: &str,
) -> Result<Vec<GoogleAdsAccountRow>, Error> {
  let ids = google_ads::list_accessible_customers(cfg, access_token)
    .await
    .map_err(|e| -> Error { Box::new(e) })?;

  let mut accounts = Vec::with_capacity(ids.len());
  for id in ids {
    // Manager-only or cancelled customers reject the lookup; keep them under their ID.
    let name = match google_ads::fetch_customer_name(cfg, access_token, &id).await {
      Ok(name) => name,
      Err(err) => {
        tracing::warn!(user_id, account_id = %id, error = %err, "customer name lookup failed");
        None
      }
    };
    accounts.push(account_row(id, name));
  }

  db::replace_google_ads_accounts(pool, user_id, &accounts).await?;
  tracing::info!(user_id, count = accounts.len(), "replaced google ads accounts");
  Ok(accounts)
}

pub fn account_row(account_id: String, name: Option<String>) -> GoogleAdsAccountRow {
  GoogleAdsAccountRow {
    account_name: name.unwrap_or_else(|| account_id.clone()),
    account_id,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unnamed_accounts_fall_back_to_id() {
    assert_eq!(account_row("42".into(), None).account_name, "42");
    assert_eq!(account_row("42".into(), Some("Shop".into())).account_name, "Shop");
  }

  #[test]
  fn resource_names_parse_to_ids() {
    assert_eq!(parse_customer_resource_name("customers/9876543210").as_deref(), Some("9876543210"));
  }
}
