use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::providers::google_ads::{self, GoogleAdsConfig, GoogleAdsError};
use crate::time_range::TimeRange;

/// One Google Ads Query Language report exposed as `POST /api/google-ads/<path>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricEndpoint {
  Campaigns,
  AdGroups,
  Keywords,
  SearchTerms,
  AdCopy,
  LandingPages,
  Geography,
  Devices,
  AgeDemographics,
  GenderDemographics,
  HourOfDay,
  DayOfWeek,
  DailyPerformance,
  Budgets,
  BudgetPacing,
  Conversions,
  QualityScore,
  NegativeKeywords,
  BiddingStrategies,
  ImpressionShare,
  Audiences,
  Assets,
  Placements,
  ChangeHistory,
  AccountOverview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
  /// `segments.date` bound to the requested time range.
  Segments,
  /// `change_event` only serves the last 30 days and needs explicit timestamps.
  ChangeEvent,
  None,
}

#[derive(Debug)]
pub struct EndpointSpec {
  pub path: &'static str,
  pub response_key: &'static str,
  pub from: &'static str,
  pub fields: &'static [&'static str],
  pub date_filter: DateFilter,
  pub campaign_filter: bool,
  pub extra_where: &'static [&'static str],
  pub order_by: Option<&'static str>,
  pub limit: Option<u32>,
  /// Flattened key → public key.
  pub renames: &'static [(&'static str, &'static str)],
}

macro_rules! with_perf {
  ($($field:literal),* $(,)?) => {
    &[
      $($field,)*
      "metrics.impressions",
      "metrics.clicks",
      "metrics.cost_micros",
      "metrics.conversions",
      "metrics.conversions_value",
      "metrics.ctr",
      "metrics.average_cpc",
    ]
  };
}

static CAMPAIGNS: EndpointSpec = EndpointSpec {
  path: "campaigns",
  response_key: "campaigns",
  from: "campaign",
  fields: with_perf!(
    "campaign.id",
    "campaign.name",
    "campaign.status",
    "campaign.advertising_channel_type"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign.status != 'REMOVED'"],
  order_by: Some("metrics.cost_micros DESC"),
  limit: None,
  renames: &[],
};

static AD_GROUPS: EndpointSpec = EndpointSpec {
  path: "ad-groups",
  response_key: "adGroups",
  from: "ad_group",
  fields: with_perf!("ad_group.id", "ad_group.name", "ad_group.status", "campaign.id", "campaign.name"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["ad_group.status != 'REMOVED'"],
  order_by: Some("metrics.cost_micros DESC"),
  limit: Some(500),
  renames: &[],
};

static KEYWORDS: EndpointSpec = EndpointSpec {
  path: "keywords",
  response_key: "keywords",
  from: "keyword_view",
  fields: with_perf!(
    "ad_group_criterion.keyword.text",
    "ad_group_criterion.keyword.match_type",
    "ad_group_criterion.status",
    "campaign.name",
    "ad_group.name"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["ad_group_criterion.status != 'REMOVED'"],
  order_by: Some("metrics.cost_micros DESC"),
  limit: Some(200),
  renames: &[
    ("adGroupCriterionKeywordText", "keyword"),
    ("adGroupCriterionKeywordMatchType", "matchType"),
    ("adGroupCriterionStatus", "status"),
  ],
};

static SEARCH_TERMS: EndpointSpec = EndpointSpec {
  path: "search-terms",
  response_key: "searchTerms",
  from: "search_term_view",
  fields: with_perf!(
    "search_term_view.search_term",
    "search_term_view.status",
    "campaign.name",
    "ad_group.name"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(200),
  renames: &[
    ("searchTermViewSearchTerm", "searchTerm"),
    ("searchTermViewStatus", "status"),
  ],
};

static AD_COPY: EndpointSpec = EndpointSpec {
  path: "ad-copy",
  response_key: "ads",
  from: "ad_group_ad",
  fields: with_perf!(
    "ad_group_ad.ad.id",
    "ad_group_ad.ad.type",
    "ad_group_ad.ad.responsive_search_ad.headlines",
    "ad_group_ad.ad.responsive_search_ad.descriptions",
    "ad_group_ad.ad.final_urls",
    "ad_group_ad.status",
    "campaign.name",
    "ad_group.name"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["ad_group_ad.status != 'REMOVED'"],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(100),
  renames: &[
    ("adGroupAdAdId", "adId"),
    ("adGroupAdAdType", "adType"),
    ("adGroupAdAdResponsiveSearchAdHeadlines", "headlines"),
    ("adGroupAdAdResponsiveSearchAdDescriptions", "descriptions"),
    ("adGroupAdAdFinalUrls", "finalUrls"),
    ("adGroupAdStatus", "status"),
  ],
};

static LANDING_PAGES: EndpointSpec = EndpointSpec {
  path: "landing-pages",
  response_key: "landingPages",
  from: "landing_page_view",
  fields: with_perf!("landing_page_view.unexpanded_final_url"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.clicks DESC"),
  limit: Some(100),
  renames: &[("landingPageViewUnexpandedFinalUrl", "finalUrl")],
};

static GEOGRAPHY: EndpointSpec = EndpointSpec {
  path: "geography",
  response_key: "geography",
  from: "geographic_view",
  fields: with_perf!(
    "geographic_view.country_criterion_id",
    "geographic_view.location_type",
    "campaign.name"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.cost_micros DESC"),
  limit: Some(100),
  renames: &[
    ("geographicViewCountryCriterionId", "countryCriterionId"),
    ("geographicViewLocationType", "locationType"),
  ],
};

static DEVICES: EndpointSpec = EndpointSpec {
  path: "devices",
  response_key: "devices",
  from: "campaign",
  fields: with_perf!("segments.device", "campaign.name"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: None,
  limit: None,
  renames: &[],
};

static AGE_DEMOGRAPHICS: EndpointSpec = EndpointSpec {
  path: "age-demographics",
  response_key: "ageRanges",
  from: "age_range_view",
  fields: with_perf!("ad_group_criterion.age_range.type", "campaign.name"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: None,
  limit: None,
  renames: &[("adGroupCriterionAgeRangeType", "ageRange")],
};

static GENDER_DEMOGRAPHICS: EndpointSpec = EndpointSpec {
  path: "gender-demographics",
  response_key: "genders",
  from: "gender_view",
  fields: with_perf!("ad_group_criterion.gender.type", "campaign.name"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: None,
  limit: None,
  renames: &[("adGroupCriterionGenderType", "gender")],
};

static HOUR_OF_DAY: EndpointSpec = EndpointSpec {
  path: "hour-of-day",
  response_key: "hourly",
  from: "campaign",
  fields: with_perf!("segments.hour"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("segments.hour"),
  limit: None,
  renames: &[],
};

static DAY_OF_WEEK: EndpointSpec = EndpointSpec {
  path: "day-of-week",
  response_key: "dayOfWeek",
  from: "campaign",
  fields: with_perf!("segments.day_of_week"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: None,
  limit: None,
  renames: &[],
};

static DAILY_PERFORMANCE: EndpointSpec = EndpointSpec {
  path: "daily-performance",
  response_key: "daily",
  from: "customer",
  fields: with_perf!("segments.date"),
  date_filter: DateFilter::Segments,
  campaign_filter: false,
  extra_where: &[],
  order_by: Some("segments.date"),
  limit: None,
  renames: &[],
};

static BUDGETS: EndpointSpec = EndpointSpec {
  path: "budgets",
  response_key: "budgets",
  from: "campaign",
  fields: &[
    "campaign.id",
    "campaign.name",
    "campaign_budget.amount_micros",
    "campaign_budget.delivery_method",
    "campaign_budget.explicitly_shared",
    "metrics.cost_micros",
    "metrics.clicks",
    "metrics.conversions",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign.status = 'ENABLED'"],
  order_by: Some("metrics.cost_micros DESC"),
  limit: None,
  renames: &[
    ("campaignBudgetAmountMicros", "budgetAmountMicros"),
    ("campaignBudgetDeliveryMethod", "deliveryMethod"),
    ("campaignBudgetExplicitlyShared", "sharedBudget"),
  ],
};

static BUDGET_PACING: EndpointSpec = EndpointSpec {
  path: "budget-pacing",
  response_key: "budgetPacing",
  from: "campaign",
  fields: &[
    "campaign.id",
    "campaign.name",
    "campaign_budget.amount_micros",
    "segments.date",
    "metrics.cost_micros",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign.status = 'ENABLED'"],
  order_by: Some("segments.date"),
  limit: None,
  renames: &[("campaignBudgetAmountMicros", "budgetAmountMicros")],
};

static CONVERSIONS: EndpointSpec = EndpointSpec {
  path: "conversions",
  response_key: "conversionActions",
  from: "campaign",
  fields: &[
    "segments.conversion_action_name",
    "segments.conversion_action_category",
    "metrics.conversions",
    "metrics.conversions_value",
    "metrics.all_conversions",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.conversions DESC"),
  limit: None,
  renames: &[],
};

static QUALITY_SCORE: EndpointSpec = EndpointSpec {
  path: "quality-score",
  response_key: "qualityScores",
  from: "keyword_view",
  fields: &[
    "ad_group_criterion.keyword.text",
    "ad_group_criterion.quality_info.quality_score",
    "ad_group_criterion.quality_info.creative_quality_score",
    "ad_group_criterion.quality_info.post_click_quality_score",
    "ad_group_criterion.quality_info.search_predicted_ctr",
    "campaign.name",
    "ad_group.name",
    "metrics.impressions",
    "metrics.clicks",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["ad_group_criterion.status != 'REMOVED'"],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(200),
  renames: &[
    ("adGroupCriterionKeywordText", "keyword"),
    ("adGroupCriterionQualityInfoQualityScore", "qualityScore"),
    ("adGroupCriterionQualityInfoCreativeQualityScore", "adRelevance"),
    ("adGroupCriterionQualityInfoPostClickQualityScore", "landingPageExperience"),
    ("adGroupCriterionQualityInfoSearchPredictedCtr", "expectedCtr"),
  ],
};

static NEGATIVE_KEYWORDS: EndpointSpec = EndpointSpec {
  path: "negative-keywords",
  response_key: "negativeKeywords",
  from: "campaign_criterion",
  fields: &[
    "campaign.id",
    "campaign.name",
    "campaign_criterion.keyword.text",
    "campaign_criterion.keyword.match_type",
  ],
  date_filter: DateFilter::None,
  campaign_filter: true,
  extra_where: &[
    "campaign_criterion.negative = TRUE",
    "campaign_criterion.type = 'KEYWORD'",
  ],
  order_by: None,
  limit: Some(500),
  renames: &[
    ("campaignCriterionKeywordText", "keyword"),
    ("campaignCriterionKeywordMatchType", "matchType"),
  ],
};

static BIDDING_STRATEGIES: EndpointSpec = EndpointSpec {
  path: "bidding-strategies",
  response_key: "biddingStrategies",
  from: "campaign",
  fields: with_perf!(
    "campaign.id",
    "campaign.name",
    "campaign.bidding_strategy_type",
    "campaign.target_cpa.target_cpa_micros",
    "campaign.target_roas.target_roas"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign.status != 'REMOVED'"],
  order_by: Some("metrics.cost_micros DESC"),
  limit: None,
  renames: &[
    ("campaignTargetCpaTargetCpaMicros", "targetCpaMicros"),
    ("campaignTargetRoasTargetRoas", "targetRoas"),
  ],
};

static IMPRESSION_SHARE: EndpointSpec = EndpointSpec {
  path: "impression-share",
  response_key: "impressionShare",
  from: "campaign",
  fields: &[
    "campaign.id",
    "campaign.name",
    "metrics.impressions",
    "metrics.search_impression_share",
    "metrics.search_budget_lost_impression_share",
    "metrics.search_rank_lost_impression_share",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign.advertising_channel_type = 'SEARCH'"],
  order_by: Some("metrics.impressions DESC"),
  limit: None,
  renames: &[],
};

static AUDIENCES: EndpointSpec = EndpointSpec {
  path: "audiences",
  response_key: "audiences",
  from: "ad_group_audience_view",
  fields: with_perf!("ad_group_criterion.display_name", "campaign.name", "ad_group.name"),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(100),
  renames: &[("adGroupCriterionDisplayName", "audience")],
};

static ASSETS: EndpointSpec = EndpointSpec {
  path: "assets",
  response_key: "assets",
  from: "campaign_asset",
  fields: &[
    "campaign.name",
    "asset.type",
    "asset.name",
    "campaign_asset.field_type",
    "campaign_asset.status",
    "metrics.impressions",
    "metrics.clicks",
  ],
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &["campaign_asset.status != 'REMOVED'"],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(200),
  renames: &[
    ("campaignAssetFieldType", "fieldType"),
    ("campaignAssetStatus", "status"),
  ],
};

static PLACEMENTS: EndpointSpec = EndpointSpec {
  path: "placements",
  response_key: "placements",
  from: "detail_placement_view",
  fields: with_perf!(
    "detail_placement_view.display_name",
    "detail_placement_view.target_url",
    "detail_placement_view.placement_type",
    "campaign.name"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("metrics.impressions DESC"),
  limit: Some(100),
  renames: &[
    ("detailPlacementViewDisplayName", "placement"),
    ("detailPlacementViewTargetUrl", "targetUrl"),
    ("detailPlacementViewPlacementType", "placementType"),
  ],
};

static CHANGE_HISTORY: EndpointSpec = EndpointSpec {
  path: "change-history",
  response_key: "changeEvents",
  from: "change_event",
  fields: &[
    "change_event.change_date_time",
    "change_event.change_resource_type",
    "change_event.resource_change_operation",
    "change_event.changed_fields",
    "change_event.user_email",
    "change_event.client_type",
    "campaign.name",
  ],
  date_filter: DateFilter::ChangeEvent,
  campaign_filter: true,
  extra_where: &[],
  order_by: Some("change_event.change_date_time DESC"),
  limit: Some(100),
  renames: &[
    ("changeEventChangeDateTime", "changeDateTime"),
    ("changeEventChangeResourceType", "resourceType"),
    ("changeEventResourceChangeOperation", "operation"),
    ("changeEventChangedFields", "changedFields"),
    ("changeEventUserEmail", "userEmail"),
    ("changeEventClientType", "clientType"),
  ],
};

static ACCOUNT_OVERVIEW: EndpointSpec = EndpointSpec {
  path: "account-overview",
  response_key: "accountOverview",
  from: "customer",
  fields: with_perf!(
    "customer.id",
    "customer.descriptive_name",
    "customer.currency_code",
    "customer.time_zone"
  ),
  date_filter: DateFilter::Segments,
  campaign_filter: false,
  extra_where: &[],
  order_by: None,
  limit: None,
  renames: &[],
};

impl MetricEndpoint {
  pub const ALL: [MetricEndpoint; 25] = [
    MetricEndpoint::Campaigns,
    MetricEndpoint::AdGroups,
    MetricEndpoint::Keywords,
    MetricEndpoint::SearchTerms,
    MetricEndpoint::AdCopy,
    MetricEndpoint::LandingPages,
    MetricEndpoint::Geography,
    MetricEndpoint::Devices,
    MetricEndpoint::AgeDemographics,
    MetricEndpoint::GenderDemographics,
    MetricEndpoint::HourOfDay,
    MetricEndpoint::DayOfWeek,
    MetricEndpoint::DailyPerformance,
    MetricEndpoint::Budgets,
    MetricEndpoint::BudgetPacing,
    MetricEndpoint::Conversions,
    MetricEndpoint::QualityScore,
    MetricEndpoint::NegativeKeywords,
    MetricEndpoint::BiddingStrategies,
    MetricEndpoint::ImpressionShare,
    MetricEndpoint::Audiences,
    MetricEndpoint::Assets,
    MetricEndpoint::Placements,
    MetricEndpoint::ChangeHistory,
    MetricEndpoint::AccountOverview,
  ];

  pub fn spec(&self) -> &'static EndpointSpec {
    match self {
      MetricEndpoint::Campaigns => &CAMPAIGNS,
      MetricEndpoint::AdGroups => &AD_GROUPS,
      MetricEndpoint::Keywords => &KEYWORDS,
      MetricEndpoint::SearchTerms => &SEARCH_TERMS,
      MetricEndpoint::AdCopy => &AD_COPY,
      MetricEndpoint::LandingPages => &LANDING_PAGES,
      MetricEndpoint::Geography => &GEOGRAPHY,
      MetricEndpoint::Devices => &DEVICES,
      MetricEndpoint::AgeDemographics => &AGE_DEMOGRAPHICS,
      MetricEndpoint::GenderDemographics => &GENDER_DEMOGRAPHICS,
      MetricEndpoint::HourOfDay => &HOUR_OF_DAY,
      MetricEndpoint::DayOfWeek => &DAY_OF_WEEK,
      MetricEndpoint::DailyPerformance => &DAILY_PERFORMANCE,
      MetricEndpoint::Budgets => &BUDGETS,
      MetricEndpoint::BudgetPacing => &BUDGET_PACING,
      MetricEndpoint::Conversions => &CONVERSIONS,
      MetricEndpoint::QualityScore => &QUALITY_SCORE,
      MetricEndpoint::NegativeKeywords => &NEGATIVE_KEYWORDS,
      MetricEndpoint::BiddingStrategies => &BIDDING_STRATEGIES,
      MetricEndpoint::ImpressionShare => &IMPRESSION_SHARE,
      MetricEndpoint::Audiences => &AUDIENCES,
      MetricEndpoint::Assets => &ASSETS,
      MetricEndpoint::Placements => &PLACEMENTS,
      MetricEndpoint::ChangeHistory => &CHANGE_HISTORY,
      MetricEndpoint::AccountOverview => &ACCOUNT_OVERVIEW,
    }
  }

  pub fn path(&self) -> &'static str {
    self.spec().path
  }

  pub fn response_key(&self) -> &'static str {
    self.spec().response_key
  }

  pub fn from_path(path: &str) -> Option<MetricEndpoint> {
    let p = path.trim().trim_matches('/');
    MetricEndpoint::ALL.into_iter().find(|e| e.path() == p)
  }
}

/// Body accepted by every per-metric endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRequest {
  #[serde(default)]
  pub access_token: String,
  #[serde(default)]
  pub account_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time_range: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub campaign_id: Option<String>,
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub skip_limit_check: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub login_customer_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum MetricReportError {
  #[error("accessToken and accountId are required")]
  MissingFields,
  #[error("invalid account id: {0}")]
  InvalidAccountId(String),
  #[error("invalid campaign id: {0}")]
  InvalidCampaignId(String),
  #[error(transparent)]
  GoogleAds(#[from] GoogleAdsError),
}

/// `123-456-7890` → `1234567890`; anything that is not digits afterwards is rejected.
pub fn normalize_customer_id(raw: &str) -> Option<String> {
  let id: String = raw.trim().chars().filter(|c| *c != '-').collect();
  if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
    return None;
  }
  Some(id)
}

/// `Ok(None)` means "all campaigns".
pub fn normalize_campaign_id(raw: Option<&str>) -> Result<Option<String>, MetricReportError> {
  let Some(v) = raw.map(str::trim) else {
    return Ok(None);
  };
  if v.is_empty() || v.eq_ignore_ascii_case("all") || v.eq_ignore_ascii_case("null") {
    return Ok(None);
  }
  normalize_customer_id(v)
    .map(Some)
    .ok_or_else(|| MetricReportError::InvalidCampaignId(v.to_string()))
}

fn date_condition(filter: DateFilter, time_range: TimeRange, today: NaiveDate) -> Option<String> {
  match filter {
    DateFilter::Segments => Some(time_range.gaql_condition(today)),
    DateFilter::ChangeEvent => {
      let start = today - Duration::days(29);
      let end = today + Duration::days(1);
      Some(format!(
        "change_event.change_date_time >= '{}' AND change_event.change_date_time < '{}'",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
      ))
    }
    DateFilter::None => None,
  }
}

/// `campaign_id` must already be normalized to digits.
pub fn build_query(
  endpoint: MetricEndpoint,
  time_range: TimeRange,
  campaign_id: Option<&str>,
  today: NaiveDate,
) -> String {
  let spec = endpoint.spec();
  let mut conditions: Vec<String> = Vec::new();
  if let Some(cond) = date_condition(spec.date_filter, time_range, today) {
    conditions.push(cond);
  }
  if spec.campaign_filter {
    if let Some(id) = campaign_id {
      conditions.push(format!("campaign.id = {id}"));
    }
  }
  conditions.extend(spec.extra_where.iter().map(|c| c.to_string()));

  let mut query = format!("SELECT {} FROM {}", spec.fields.join(", "), spec.from);
  if !conditions.is_empty() {
    query.push_str(" WHERE ");
    query.push_str(&conditions.join(" AND "));
  }
  if let Some(order) = spec.order_by {
    query.push_str(" ORDER BY ");
    query.push_str(order);
  }
  if let Some(limit) = spec.limit {
    query.push_str(&format!(" LIMIT {limit}"));
  }
  query
}

fn upper_first(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
    None => String::new(),
  }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
  match value {
    Value::Object(map) => {
      for (k, v) in map {
        if k == "resourceName" {
          continue;
        }
        let key = if prefix.is_empty() {
          k.clone()
        } else {
          format!("{prefix}{}", upper_first(k))
        };
        flatten_into(&key, v, out);
      }
    }
    leaf => {
      out.insert(prefix.to_string(), leaf.clone());
    }
  }
}

/// Flattens one REST search row: `metrics.*`/`segments.*` keep their leaf names,
/// other resources are prefixed (`campaign.name` → `campaignName`).
pub fn flatten_row(row: &Value, renames: &[(&str, &str)]) -> Value {
  let mut out = Map::new();
  if let Some(obj) = row.as_object() {
    for (resource, v) in obj {
      if resource == "resourceName" {
        continue;
      }
      let prefix = if resource == "metrics" || resource == "segments" {
        ""
      } else {
        resource.as_str()
      };
      flatten_into(prefix, v, &mut out);
    }
  }
  for (from, to) in renames {
    if let Some(v) = out.remove(*from) {
      out.insert(to.to_string(), v);
    }
  }
  Value::Object(out)
}

/// Runs one metric report and shapes it as `{<responseKey>: rows, accountId, timeRange, campaignId}`.
pub async fn run_metric_report(
  cfg: &GoogleAdsConfig,
  endpoint: MetricEndpoint,
  req: &MetricRequest,
  today: NaiveDate,
) -> Result<Value, MetricReportError> {
  if req.access_token.trim().is_empty() || req.account_id.trim().is_empty() {
    return Err(MetricReportError::MissingFields);
  }
  let customer_id = normalize_customer_id(&req.account_id)
    .ok_or_else(|| MetricReportError::InvalidAccountId(req.account_id.clone()))?;
  let login_customer_id = match req.login_customer_id.as_deref().map(str::trim) {
    Some(v) if !v.is_empty() => Some(
      normalize_customer_id(v).ok_or_else(|| MetricReportError::InvalidAccountId(v.to_string()))?,
    ),
    _ => None,
  };
  let campaign_id = normalize_campaign_id(req.campaign_id.as_deref())?;
  let time_range = TimeRange::parse_or_default(req.time_range.as_deref());

  let query = build_query(endpoint, time_range, campaign_id.as_deref(), today);
  tracing::debug!(endpoint = endpoint.path(), customer_id = %customer_id, %query, "running gaql report");

  let rows = google_ads::search(
    cfg,
    req.access_token.trim(),
    &customer_id,
    login_customer_id.as_deref(),
    &query,
  )
  .await?;

  let spec = endpoint.spec();
  let flat: Vec<Value> = rows.iter().map(|r| flatten_row(r, spec.renames)).collect();

  let mut out = Map::new();
  out.insert(spec.response_key.to_string(), Value::Array(flat));
  out.insert("accountId".to_string(), Value::String(customer_id));
  out.insert("timeRange".to_string(), Value::String(time_range.as_str().to_string()));
  out.insert(
    "campaignId".to_string(),
    campaign_id.map(Value::String).unwrap_or(Value::Null),
  );
  Ok(Value::Object(out))
}
