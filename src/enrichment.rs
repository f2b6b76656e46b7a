use futures::future::try_join_all;
use serde_json::{json, Value};

use crate::internal_api::{response_rows, MetricFetchError, MetricSource};
use crate::metrics::{MetricEndpoint, MetricRequest};

pub const MAX_ROWS_PER_TABLE: usize = 25;

/// Reports pulled into a custom report, with their section titles.
pub const ENRICHMENT_SECTIONS: [(MetricEndpoint, &str); 12] = [
  (MetricEndpoint::Campaigns, "Campaign performance"),
  (MetricEndpoint::Keywords, "Keywords"),
  (MetricEndpoint::SearchTerms, "Search terms"),
  (MetricEndpoint::Geography, "Geography"),
  (MetricEndpoint::AdCopy, "Ad copy"),
  (MetricEndpoint::Devices, "Devices"),
  (MetricEndpoint::LandingPages, "Landing pages"),
  (MetricEndpoint::DailyPerformance, "Daily performance"),
  (MetricEndpoint::Budgets, "Budgets"),
  (MetricEndpoint::Conversions, "Conversions"),
  (MetricEndpoint::ImpressionShare, "Impression share"),
  (MetricEndpoint::AgeDemographics, "Age demographics"),
];

/// `{columns, rows}` over the first [`MAX_ROWS_PER_TABLE`] rows; columns in first-seen order.
pub fn to_table(rows: &[Value]) -> Value {
  let rows = &rows[..rows.len().min(MAX_ROWS_PER_TABLE)];
  let mut columns: Vec<String> = Vec::new();
  for row in rows {
    if let Some(obj) = row.as_object() {
      for key in obj.keys() {
        if !columns.iter().any(|c| c == key) {
          columns.push(key.clone());
        }
      }
    }
  }

  let table_rows: Vec<Value> = rows
    .iter()
    .map(|row| {
      Value::Array(
        columns
          .iter()
          .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
          .collect(),
      )
    })
    .collect();

  json!({ "columns": columns, "rows": table_rows })
}

pub fn render_section(title: &str, table: &Value) -> String {
  format!("## {title}\n```json\n{table}\n```")
}

/// Fetches all sections concurrently. Any single failure fails the whole enrichment.
pub async fn build_enrichment<S: MetricSource + ?Sized>(
  source: &S,
  request: &MetricRequest,
) -> Result<String, MetricFetchError> {
  let fetches = ENRICHMENT_SECTIONS.iter().map(|(endpoint, title)| async move {
    let body = source.fetch_metric(*endpoint, request).await?;
    let table = to_table(&response_rows(*endpoint, &body));
    Ok::<_, MetricFetchError>(render_section(title, &table))
  });

  let sections = try_join_all(fetches).await?;
  Ok(sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Source {
    fail_on: Option<MetricEndpoint>,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl MetricSource for Source {
    async fn fetch_metric(&self, endpoint: MetricEndpoint, _request: &MetricRequest) -> Result<Value, MetricFetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if Some(endpoint) == self.fail_on {
        return Err(MetricFetchError::Status {
          path: endpoint.path().to_string(),
          status: 500,
          body: "boom".into(),
        });
      }
      let mut body = serde_json::Map::new();
      body.insert(
        endpoint.response_key().to_string(),
        json!([{"campaignName": "A", "clicks": "3"}]),
      );
      Ok(Value::Object(body))
    }
  }

  #[test]
  fn table_caps_rows_and_unions_columns() {
    let mut rows: Vec<Value> = (0..30).map(|i| json!({"a": i})).collect();
    rows[1] = json!({"a": 1, "b": "x"});
    let t = to_table(&rows);
    assert_eq!(t["columns"], json!(["a", "b"]));
    assert_eq!(t["rows"].as_array().unwrap().len(), 25);
    assert_eq!(t["rows"][0], json!([0, null]));
    assert_eq!(t["rows"][1], json!([1, "x"]));
  }

  #[tokio::test]
  async fn renders_all_twelve_sections() {
    let source = Source {
      fail_on: None,
      calls: AtomicUsize::new(0),
    };
    let text = build_enrichment(&source, &MetricRequest::default()).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 12);
    assert_eq!(text.matches("## ").count(), 12);
    assert!(text.starts_with("## Campaign performance"));
  }

  #[tokio::test]
  async fn any_failure_fails_enrichment() {
    let source = Source {
      fail_on: Some(MetricEndpoint::Geography),
      calls: AtomicUsize::new(0),
    };
    let err = build_enrichment(&source, &MetricRequest::default()).await.unwrap_err();
    assert!(err.to_string().contains("500"));
  }
}
