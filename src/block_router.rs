use thiserror::Error;

use crate::metrics::MetricEndpoint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown block ID: {0}")]
pub struct UnknownBlockId(pub String);

/// Every accepted block ID and the metric endpoint it serves.
pub static BLOCK_ALIASES: &[(&str, MetricEndpoint)] = &[
  // dashboard numeric IDs
  ("block1", MetricEndpoint::Campaigns),
  ("block2", MetricEndpoint::Keywords),
  ("block3", MetricEndpoint::SearchTerms),
  ("block4", MetricEndpoint::AdCopy),
  ("block5", MetricEndpoint::LandingPages),
  ("block6", MetricEndpoint::Geography),
  ("block7", MetricEndpoint::Devices),
  ("block8", MetricEndpoint::AgeDemographics),
  ("block9", MetricEndpoint::GenderDemographics),
  ("block10", MetricEndpoint::HourOfDay),
  ("block11", MetricEndpoint::DayOfWeek),
  ("block12", MetricEndpoint::DailyPerformance),
  ("block13", MetricEndpoint::Budgets),
  ("block14", MetricEndpoint::Conversions),
  ("block15", MetricEndpoint::QualityScore),
  ("block16", MetricEndpoint::NegativeKeywords),
  ("block17", MetricEndpoint::BiddingStrategies),
  ("block18", MetricEndpoint::ImpressionShare),
  ("block19", MetricEndpoint::Audiences),
  ("block20", MetricEndpoint::Assets),
  // named IDs
  ("campaigns", MetricEndpoint::Campaigns),
  ("adGroups", MetricEndpoint::AdGroups),
  ("keywords", MetricEndpoint::Keywords),
  ("searchTerms", MetricEndpoint::SearchTerms),
  ("adCopy", MetricEndpoint::AdCopy),
  ("landingPages", MetricEndpoint::LandingPages),
  ("geography", MetricEndpoint::Geography),
  ("devices", MetricEndpoint::Devices),
  ("ageDemographics", MetricEndpoint::AgeDemographics),
  ("genderDemographics", MetricEndpoint::GenderDemographics),
  ("hourOfDay", MetricEndpoint::HourOfDay),
  ("dayOfWeek", MetricEndpoint::DayOfWeek),
  ("dailyPerformance", MetricEndpoint::DailyPerformance),
  ("budgets", MetricEndpoint::Budgets),
  ("budgetPacing", MetricEndpoint::BudgetPacing),
  ("conversions", MetricEndpoint::Conversions),
  ("qualityScore", MetricEndpoint::QualityScore),
  ("negativeKeywords", MetricEndpoint::NegativeKeywords),
  ("biddingStrategies", MetricEndpoint::BiddingStrategies),
  ("impressionShare", MetricEndpoint::ImpressionShare),
  ("audiences", MetricEndpoint::Audiences),
  ("assets", MetricEndpoint::Assets),
  ("placements", MetricEndpoint::Placements),
  ("changeHistory", MetricEndpoint::ChangeHistory),
  ("accountOverview", MetricEndpoint::AccountOverview),
  // weekly analysis
  ("block1_budget_pacing", MetricEndpoint::BudgetPacing),
  ("block2_campaign_performance", MetricEndpoint::Campaigns),
  ("block3_search_terms", MetricEndpoint::SearchTerms),
  ("block4_keywords", MetricEndpoint::Keywords),
  ("block5_ad_copy", MetricEndpoint::AdCopy),
  ("block6_conversions", MetricEndpoint::Conversions),
  ("block7_change_history", MetricEndpoint::ChangeHistory),
  ("block8_impression_share", MetricEndpoint::ImpressionShare),
];

pub fn resolve_block_id(block_id: &str) -> Result<MetricEndpoint, UnknownBlockId> {
  let id = block_id.trim();
  BLOCK_ALIASES
    .iter()
    .find(|(alias, _)| *alias == id)
    .map(|(_, endpoint)| *endpoint)
    .ok_or_else(|| UnknownBlockId(block_id.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn every_alias_resolves_to_a_path() {
    for (alias, endpoint) in BLOCK_ALIASES {
      let resolved = resolve_block_id(alias).unwrap();
      assert_eq!(resolved, *endpoint);
      assert!(!resolved.path().is_empty());
    }
  }

  #[test]
  fn aliases_are_unique_and_cover_every_endpoint() {
    let aliases: HashSet<_> = BLOCK_ALIASES.iter().map(|(a, _)| *a).collect();
    assert_eq!(aliases.len(), BLOCK_ALIASES.len());
    let endpoints: HashSet<_> = BLOCK_ALIASES.iter().map(|(_, e)| *e).collect();
    assert_eq!(endpoints.len(), MetricEndpoint::ALL.len());
  }

  #[test]
  fn unknown_block_id_message() {
    let err = resolve_block_id("block99").unwrap_err();
    assert_eq!(err.to_string(), "Unknown block ID: block99");
    assert!(resolve_block_id("Block1").is_err());
  }
}
