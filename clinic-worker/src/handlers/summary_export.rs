//! Conversion of stored summaries to the patient summary of the clinic API.
//!
//! Percentages of short or sparsely covered periods are left out so the clinic
//! UI never sorts or filters patients on them.

use std::collections::BTreeMap;

use clinic_common::models::summary::{
    BgmPeriod, BgmStats, CgmPeriod, CgmStats, MetricStats, RangeStats, StoredPeriod, StoredRange,
    PERIODS,
};
use clinic_common::models::{PatientSummary, StoredSummary, SummaryType};

/// Sensor wear needed before the glucose management indicator, and the
/// ranges of a single day, mean anything.
const MIN_CGM_USE_PERCENT: f64 = 0.7;
/// Wear needed before the ranges of multi-day periods are shown.
const MIN_CGM_USE_MINUTES: i64 = 24 * 60;

/// Number of days of a period key such as `14d`.
fn period_days(key: &str) -> Option<u32> {
    key.strip_suffix('d')?.parse().ok()
}

fn range(stored: &StoredRange, delta: Option<&StoredRange>, with_percent: bool) -> RangeStats {
    let delta = delta.copied().unwrap_or_default();
    RangeStats {
        percent: with_percent.then_some(stored.percent),
        percent_delta: with_percent.then_some(delta.percent),
        has_percent: with_percent,
        minutes: stored.minutes,
        minutes_delta: delta.minutes,
        has_minutes: stored.minutes != 0,
        records: stored.records,
        records_delta: delta.records,
        has_records: stored.records != 0,
    }
}

fn metric(value: f64, delta: Option<f64>, present: bool) -> MetricStats {
    if !present {
        return MetricStats::default();
    }
    MetricStats {
        value: Some(value),
        delta: Some(delta.unwrap_or_default()),
        has_value: true,
    }
}

/// The eight glucose ranges of a period, in `CgmPeriod` field order.
struct Ranges([RangeStats; 8]);

impl Ranges {
    fn new(stored: &StoredPeriod, with_percent: bool) -> Self {
        let delta = stored.delta.as_deref();
        let pick = |select: fn(&StoredPeriod) -> &StoredRange| {
            range(select(stored), delta.map(select), with_percent)
        };
        Ranges([
            pick(|period| &period.in_very_low),
            pick(|period| &period.in_low),
            pick(|period| &period.in_any_low),
            pick(|period| &period.in_target),
            pick(|period| &period.in_high),
            pick(|period| &period.in_very_high),
            pick(|period| &period.in_extreme_high),
            pick(|period| &period.in_any_high),
        ])
    }
}

pub fn cgm_period(days: u32, stored: &StoredPeriod) -> CgmPeriod {
    let delta = stored.delta.as_deref();
    let total_records = stored.total.records;
    let has_records = total_records != 0;
    let cgm_use_percent = stored.total.percent;

    let show_ranges = has_records
        && if days <= 1 {
            cgm_use_percent > MIN_CGM_USE_PERCENT
        } else {
            stored.total.minutes > MIN_CGM_USE_MINUTES
        };
    let show_gmi = has_records && cgm_use_percent > MIN_CGM_USE_PERCENT;

    let Ranges([very_low, low, any_low, target, high, very_high, extreme_high, any_high]) =
        Ranges::new(stored, show_ranges);

    CgmPeriod {
        time_cgm_use: range(&stored.total, delta.map(|delta| &delta.total), has_records),
        time_in_very_low: very_low,
        time_in_low: low,
        time_in_any_low: any_low,
        time_in_target: target,
        time_in_high: high,
        time_in_very_high: very_high,
        time_in_extreme_high: extreme_high,
        time_in_any_high: any_high,
        average_glucose_mmol: metric(
            stored.average_glucose_mmol,
            delta.map(|delta| delta.average_glucose_mmol),
            has_records,
        ),
        glucose_management_indicator: metric(
            stored.glucose_management_indicator,
            delta.map(|delta| delta.glucose_management_indicator),
            show_gmi,
        ),
        standard_deviation: metric(
            stored.standard_deviation,
            delta.map(|delta| delta.standard_deviation),
            has_records,
        ),
        coefficient_of_variation: metric(
            stored.coefficient_of_variation,
            delta.map(|delta| delta.coefficient_of_variation),
            has_records,
        ),
        average_daily_records: metric(
            stored.average_daily_records,
            delta.map(|delta| delta.average_daily_records),
            has_records,
        ),
        total_records,
        total_records_delta: delta.map(|delta| delta.total.records).unwrap_or_default(),
        has_total_records: has_records,
        days_with_data: stored.days_with_data,
        hours_with_data: stored.hours_with_data,
    }
}

pub fn bgm_period(stored: &StoredPeriod) -> BgmPeriod {
    let delta = stored.delta.as_deref();
    let total_records = stored.total.records;
    let has_records = total_records != 0;

    let Ranges([very_low, low, any_low, target, high, very_high, extreme_high, any_high]) =
        Ranges::new(stored, has_records);

    BgmPeriod {
        time_in_very_low: very_low,
        time_in_low: low,
        time_in_any_low: any_low,
        time_in_target: target,
        time_in_high: high,
        time_in_very_high: very_high,
        time_in_extreme_high: extreme_high,
        time_in_any_high: any_high,
        average_glucose_mmol: metric(
            stored.average_glucose_mmol,
            delta.map(|delta| delta.average_glucose_mmol),
            has_records,
        ),
        standard_deviation: metric(
            stored.standard_deviation,
            delta.map(|delta| delta.standard_deviation),
            has_records,
        ),
        coefficient_of_variation: metric(
            stored.coefficient_of_variation,
            delta.map(|delta| delta.coefficient_of_variation),
            has_records,
        ),
        average_daily_records: metric(
            stored.average_daily_records,
            delta.map(|delta| delta.average_daily_records),
            has_records,
        ),
        total_records,
        total_records_delta: delta.map(|delta| delta.total.records).unwrap_or_default(),
        has_total_records: has_records,
        days_with_data: stored.days_with_data,
    }
}

fn periods<P>(
    stored: &BTreeMap<String, StoredPeriod>,
    convert: impl Fn(u32, &StoredPeriod) -> P,
) -> BTreeMap<String, P> {
    PERIODS
        .iter()
        .filter_map(|key| {
            let period = stored.get(*key)?;
            let days = period_days(key)?;
            Some((key.to_string(), convert(days, period)))
        })
        .collect()
}

/// The clinic API update body of a stored summary, `None` for unknown types.
pub fn patient_summary(summary: &StoredSummary) -> Option<PatientSummary> {
    match summary.summary_type {
        SummaryType::Cgm => Some(PatientSummary {
            cgm_stats: Some(CgmStats {
                id: summary.id.clone(),
                dates: summary.dates.clone(),
                config: summary.config.clone(),
                periods: periods(&summary.periods, cgm_period),
            }),
            bgm_stats: None,
        }),
        SummaryType::Bgm => Some(PatientSummary {
            cgm_stats: None,
            bgm_stats: Some(BgmStats {
                id: summary.id.clone(),
                dates: summary.dates.clone(),
                config: summary.config.clone(),
                periods: periods(&summary.periods, |_, period| bgm_period(period)),
            }),
        }),
        SummaryType::Unknown => None,
    }
}
