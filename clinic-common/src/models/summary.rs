//! Glucose summaries.
//!
//! The data service stores one summary per user and type (`StoredSummary`,
//! carried by the `data.summary` topic). The clinic API keeps a denormalized
//! copy on each clinic patient (`PatientSummary`) with presence flags that
//! drive sorting and filtering in the clinic UI.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PERIODS: [&str; 4] = ["1d", "7d", "14d", "30d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Cgm,
    Bgm,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryDates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_data: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_data: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_upload_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outdated_since: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "null_as_empty")]
    pub last_updated_reason: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub outdated_reason: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Records, minutes and percentage of a glucose range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredRange {
    pub records: i64,
    pub minutes: i64,
    pub percent: f64,
}

/// A summary period as stored by the data service. For CGM summaries
/// `total.minutes` and `total.percent` describe the sensor wear time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredPeriod {
    pub total: StoredRange,
    pub in_very_low: StoredRange,
    pub in_low: StoredRange,
    pub in_any_low: StoredRange,
    pub in_target: StoredRange,
    pub in_high: StoredRange,
    pub in_very_high: StoredRange,
    pub in_extreme_high: StoredRange,
    pub in_any_high: StoredRange,
    pub average_glucose_mmol: f64,
    pub glucose_management_indicator: f64,
    pub standard_deviation: f64,
    pub coefficient_of_variation: f64,
    pub average_daily_records: f64,
    pub days_with_data: i64,
    pub hours_with_data: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Box<StoredPeriod>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSummary {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub summary_type: SummaryType,
    #[serde(default)]
    pub dates: SummaryDates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default)]
    pub periods: BTreeMap<String, StoredPeriod>,
}

/// A range as exposed by the clinic API. Every count has a presence flag,
/// percentages are only set when meaningful for the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RangeStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_delta: Option<f64>,
    pub has_percent: bool,
    pub minutes: i64,
    pub minutes_delta: i64,
    pub has_minutes: bool,
    pub records: i64,
    pub records_delta: i64,
    pub has_records: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    pub has_value: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CgmPeriod {
    #[serde(rename = "timeCGMUse")]
    pub time_cgm_use: RangeStats,
    pub time_in_very_low: RangeStats,
    pub time_in_low: RangeStats,
    pub time_in_any_low: RangeStats,
    pub time_in_target: RangeStats,
    pub time_in_high: RangeStats,
    pub time_in_very_high: RangeStats,
    pub time_in_extreme_high: RangeStats,
    pub time_in_any_high: RangeStats,
    pub average_glucose_mmol: MetricStats,
    pub glucose_management_indicator: MetricStats,
    pub standard_deviation: MetricStats,
    pub coefficient_of_variation: MetricStats,
    pub average_daily_records: MetricStats,
    pub total_records: i64,
    pub total_records_delta: i64,
    pub has_total_records: bool,
    pub days_with_data: i64,
    pub hours_with_data: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BgmPeriod {
    pub time_in_very_low: RangeStats,
    pub time_in_low: RangeStats,
    pub time_in_any_low: RangeStats,
    pub time_in_target: RangeStats,
    pub time_in_high: RangeStats,
    pub time_in_very_high: RangeStats,
    pub time_in_extreme_high: RangeStats,
    pub time_in_any_high: RangeStats,
    pub average_glucose_mmol: MetricStats,
    pub standard_deviation: MetricStats,
    pub coefficient_of_variation: MetricStats,
    pub average_daily_records: MetricStats,
    pub total_records: i64,
    pub total_records_delta: i64,
    pub has_total_records: bool,
    pub days_with_data: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats<P> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub dates: SummaryDates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default = "BTreeMap::new")]
    pub periods: BTreeMap<String, P>,
}

pub type CgmStats = Stats<CgmPeriod>;
pub type BgmStats = Stats<BgmPeriod>;

impl<P> Stats<P> {
    pub fn period(&self, key: &str) -> Option<&P> {
        self.periods.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(
        rename = "cgmStats",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cgm_stats: Option<CgmStats>,
    #[serde(
        rename = "bgmStats",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bgm_stats: Option<BgmStats>,
}
