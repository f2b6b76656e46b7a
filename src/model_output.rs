use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelOutputError {
  #[error("Invalid JSON response from Gemini API")]
  InvalidJson(#[source] serde_json::Error),
}

/// Removes a leading ```` ```json ```` / ```` ``` ```` fence and the closing fence.
pub fn strip_markdown_fences(raw: &str) -> String {
  let text = raw.trim();
  let Some(rest) = text.strip_prefix("```") else {
    return text.to_string();
  };

  let rest = match rest.find('\n') {
    Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &rest[nl + 1..],
    _ => rest
      .strip_prefix("json")
      .or_else(|| rest.strip_prefix("JSON"))
      .unwrap_or(rest),
  };
  let rest = rest.trim_end();
  let rest = rest.strip_suffix("```").unwrap_or(rest);
  rest.trim().to_string()
}

/// Strict decode of model output into `T`. There is no repair step: text that does not
/// match `T` exactly is an error.
pub fn decode_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, ModelOutputError> {
  let cleaned = strip_markdown_fences(raw);
  serde_json::from_str(&cleaned).map_err(ModelOutputError::InvalidJson)
}

/// `{choices: [{message: {content}}]}`, the shape the dashboard reads free-text reports from.
pub fn chat_completion_body(content: &str) -> serde_json::Value {
  serde_json::json!({
    "choices": [{ "message": { "role": "assistant", "content": content } }]
  })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationResults {
  pub estimated_clicks: f64,
  pub estimated_conversions: f64,
  pub estimated_revenue: f64,
  pub roi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyMetrics {
  pub estimated_impressions: f64,
  pub average_cpc: f64,
  pub ctr: f64,
  pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetSimulation {
  pub simulation_results: SimulationResults,
  pub key_metrics: KeyMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAccount {
  pub account_id: String,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAccountsAnalysis {
  pub active_accounts: Vec<ActiveAccount>,
  pub analysis_summary: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  const BUDGET: &str = r#"{
    "simulation_results": {"estimated_clicks": 5000, "estimated_conversions": 150, "estimated_revenue": 30000, "roi": 2.0},
    "key_metrics": {"estimated_impressions": 120000, "average_cpc": 2.0, "ctr": 4.2, "conversion_rate": 3.0}
  }"#;

  #[test]
  fn strips_json_fences() {
    assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    assert_eq!(strip_markdown_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
    assert_eq!(strip_markdown_fences("```json {\"a\":1}```"), "{\"a\":1}");
    assert_eq!(strip_markdown_fences("  plain text  "), "plain text");
  }

  #[test]
  fn decodes_fenced_budget_simulation() {
    let fenced = format!("```json\n{BUDGET}\n```");
    let sim: BudgetSimulation = decode_model_json(&fenced).unwrap();
    assert_eq!(sim.simulation_results.roi, 2.0);
    assert_eq!(sim.key_metrics.average_cpc, 2.0);
  }

  #[test]
  fn budget_simulation_rejects_extra_and_missing_keys() {
    let extra = BUDGET.replace("\"roi\": 2.0", "\"roi\": 2.0, \"notes\": \"x\"");
    assert!(decode_model_json::<BudgetSimulation>(&extra).is_err());

    let missing = BUDGET.replace(", \"conversion_rate\": 3.0", "");
    assert!(decode_model_json::<BudgetSimulation>(&missing).is_err());
  }

  #[test]
  fn non_json_reports_invalid_json_message() {
    let err = decode_model_json::<ActiveAccountsAnalysis>("Sure! Here is the analysis").unwrap_err();
    assert_eq!(err.to_string(), "Invalid JSON response from Gemini API");
  }
}
