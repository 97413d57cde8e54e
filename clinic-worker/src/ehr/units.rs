//! Glucose unit conversion and the number formats of flowsheet values.

use clinic_common::models::BgUnits;

/// mg/dL per mmol/L of glucose.
pub const MMOL_TO_MGDL: f64 = 18.01559;

/// Precision of every value when the clinic does not use icodes.
const FULL_PRECISION: usize = 4;

/// Converts a glucose value stored in mmol/L.
pub fn from_mmol(value: f64, units: BgUnits) -> f64 {
    match units {
        BgUnits::MmolL => value,
        BgUnits::MgdL => value * MMOL_TO_MGDL,
    }
}

fn round(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn format(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, round(value, decimals))
}

/// A glucose value stored in mmol/L, in the clinic units. Icode values are
/// whole mg/dL or tenths of mmol/L.
pub fn format_glucose(mmol: f64, units: BgUnits, icode: bool) -> String {
    let value = from_mmol(mmol, units);
    let decimals = match (icode, units) {
        (false, _) => FULL_PRECISION,
        (true, BgUnits::MgdL) => 0,
        (true, BgUnits::MmolL) => 1,
    };
    format(value, decimals)
}

/// Any other numeric value, percentages included.
pub fn format_numeric(value: f64, icode: bool) -> String {
    format(value, if icode { 1 } else { FULL_PRECISION })
}

/// Stored ratios are in [0, 1], flowsheets carry percentages.
pub fn format_percent(ratio: f64, icode: bool) -> String {
    format_numeric(ratio * 100.0, icode)
}
