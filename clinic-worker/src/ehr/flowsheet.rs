//! Glucose statistics of the last two weeks as flowsheet observations.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use clinic_common::ehr::{Observation, ValueType};
use clinic_common::models::summary::{BgmPeriod, CgmPeriod, Stats};
use clinic_common::models::{BgUnits, PatientSummary, SummaryDates};

use super::units::{format_glucose, format_numeric, format_percent};

pub const NOT_AVAILABLE: &str = "NOT AVAILABLE";
const REPORTING_PERIOD: &str = "14d";
const PERCENT: &str = "%";
const READINGS_PER_DAY: &str = "readings/day";

pub fn format_date_time(date_time: DateTime<Utc>) -> String {
    date_time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The two weeks up to the last data, never starting before the first data.
pub fn reporting_window(dates: &SummaryDates) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let end = dates.last_data?;
    let mut start = end - Duration::days(14);
    if let Some(first_data) = dates.first_data {
        start = start.max(first_data).min(end);
    }
    Some((start, end))
}

/// Appends observations sharing a reporting time and glucose units.
struct Observations {
    date_time: String,
    units: BgUnits,
    icode: bool,
    observations: Vec<Observation>,
}

impl Observations {
    fn new<P>(stats: Option<&Stats<P>>, units: BgUnits, icode: bool, now: DateTime<Utc>) -> Self {
        let reported_at = stats
            .and_then(|stats| stats.dates.last_updated_date)
            .unwrap_or(now);
        Self {
            date_time: format_date_time(reported_at),
            units,
            icode,
            observations: Vec::new(),
        }
    }

    fn push(
        &mut self,
        code: &str,
        description: &str,
        value: Option<String>,
        value_type: ValueType,
        units: Option<&str>,
    ) {
        self.observations.push(Observation {
            date_time: self.date_time.clone(),
            value: value.unwrap_or_else(|| NOT_AVAILABLE.to_owned()),
            value_type,
            units: units.map(str::to_owned),
            code: code.to_owned(),
            codeset: None,
            description: description.to_owned(),
        });
    }

    fn date(&mut self, code: &str, description: &str, value: Option<DateTime<Utc>>) {
        self.push(
            code,
            description,
            value.map(format_date_time),
            ValueType::DateTime,
            None,
        );
    }

    fn percent(&mut self, code: &str, description: &str, ratio: Option<f64>) {
        let value = ratio.map(|ratio| format_percent(ratio, self.icode));
        self.push(code, description, value, ValueType::Numeric, Some(PERCENT));
    }

    fn glucose(&mut self, code: &str, description: &str, mmol: Option<f64>) {
        let value = mmol.map(|mmol| format_glucose(mmol, self.units, self.icode));
        let units = self.units.to_string();
        self.push(code, description, value, ValueType::Numeric, Some(&units));
    }

    fn numeric(&mut self, code: &str, description: &str, value: Option<f64>, units: &str) {
        let value = value.map(|value| format_numeric(value, self.icode));
        self.push(code, description, value, ValueType::Numeric, Some(units));
    }
}

fn cgm_observations(
    stats: Option<&Stats<CgmPeriod>>,
    units: BgUnits,
    icode: bool,
    now: DateTime<Utc>,
) -> Vec<Observation> {
    let mut out = Observations::new(stats, units, icode, now);
    let window = stats.and_then(|stats| reporting_window(&stats.dates));
    let period = stats.and_then(|stats| stats.period(REPORTING_PERIOD));

    out.date(
        "REPORTING_PERIOD_START_CGM",
        "Reporting period start CGM",
        window.map(|(start, _)| start),
    );
    out.date(
        "REPORTING_PERIOD_END_CGM",
        "Reporting period end CGM",
        window.map(|(_, end)| end),
    );
    out.date(
        "REPORTING_PERIOD_START_CGM_DATA",
        "Reporting period start CGM data",
        stats.and_then(|stats| stats.dates.first_data),
    );
    out.percent(
        "ACTIVE_WEAR_TIME_CGM",
        "Percentage of time CGM active",
        period.and_then(|period| period.time_cgm_use.percent),
    );
    out.glucose(
        "AVERAGE_CGM",
        "Mean glucose CGM",
        period.and_then(|period| period.average_glucose_mmol.value),
    );
    out.numeric(
        "GLUCOSE_MANAGEMENT_INDICATOR",
        "Glucose management indicator",
        period.and_then(|period| period.glucose_management_indicator.value),
        PERCENT,
    );
    out.percent(
        "TIME_BELOW_RANGE_VERY_LOW_CGM",
        "Time below range very low CGM",
        period.and_then(|period| period.time_in_very_low.percent),
    );
    out.percent(
        "TIME_BELOW_RANGE_LOW_CGM",
        "Time below range low CGM",
        period.and_then(|period| period.time_in_low.percent),
    );
    out.percent(
        "TIME_IN_RANGE_CGM",
        "Time in range CGM",
        period.and_then(|period| period.time_in_target.percent),
    );
    out.percent(
        "TIME_ABOVE_RANGE_HIGH_CGM",
        "Time above range high CGM",
        period.and_then(|period| period.time_in_high.percent),
    );
    out.percent(
        "TIME_ABOVE_RANGE_VERY_HIGH_CGM",
        "Time above range very high CGM",
        period.and_then(|period| period.time_in_very_high.percent),
    );

    out.observations
}

fn bgm_observations(
    stats: Option<&Stats<BgmPeriod>>,
    units: BgUnits,
    icode: bool,
    now: DateTime<Utc>,
) -> Vec<Observation> {
    let mut out = Observations::new(stats, units, icode, now);
    let window = stats.and_then(|stats| reporting_window(&stats.dates));
    let period = stats.and_then(|stats| stats.period(REPORTING_PERIOD));

    out.date(
        "REPORTING_PERIOD_START_SMBG",
        "Reporting period start SMBG",
        window.map(|(start, _)| start),
    );
    out.date(
        "REPORTING_PERIOD_END_SMBG",
        "Reporting period end SMBG",
        window.map(|(_, end)| end),
    );
    out.date(
        "REPORTING_PERIOD_START_SMBG_DATA",
        "Reporting period start SMBG data",
        stats.and_then(|stats| stats.dates.first_data),
    );
    out.numeric(
        "CHECK_RATE_READINGS_DAY_SMBG",
        "Check rate readings per day SMBG",
        period.and_then(|period| period.average_daily_records.value),
        READINGS_PER_DAY,
    );
    out.glucose(
        "AVERAGE_SMBG",
        "Mean glucose SMBG",
        period.and_then(|period| period.average_glucose_mmol.value),
    );
    out.percent(
        "TIME_BELOW_RANGE_VERY_LOW_SMBG",
        "Time below range very low SMBG",
        period.and_then(|period| period.time_in_very_low.percent),
    );
    out.percent(
        "TIME_BELOW_RANGE_LOW_SMBG",
        "Time below range low SMBG",
        period.and_then(|period| period.time_in_low.percent),
    );
    out.percent(
        "TIME_IN_RANGE_SMBG",
        "Time in range SMBG",
        period.and_then(|period| period.time_in_target.percent),
    );
    out.percent(
        "TIME_ABOVE_RANGE_HIGH_SMBG",
        "Time above range high SMBG",
        period.and_then(|period| period.time_in_high.percent),
    );
    out.percent(
        "TIME_ABOVE_RANGE_VERY_HIGH_SMBG",
        "Time above range very high SMBG",
        period.and_then(|period| period.time_in_very_high.percent),
    );

    out.observations
}

/// Observations of a patient summary. Patients without any summary have
/// nothing to report, otherwise every code is present and missing values are
/// marked as not available.
pub fn observations(
    summary: Option<&PatientSummary>,
    units: BgUnits,
    icode: bool,
    now: DateTime<Utc>,
) -> Vec<Observation> {
    let cgm = summary.and_then(|summary| summary.cgm_stats.as_ref());
    let bgm = summary.and_then(|summary| summary.bgm_stats.as_ref());
    if cgm.is_none() && bgm.is_none() {
        return Vec::new();
    }

    let mut observations = cgm_observations(cgm, units, icode, now);
    observations.extend(bgm_observations(bgm, units, icode, now));
    observations
}
