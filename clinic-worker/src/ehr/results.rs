use chrono::{DateTime, Utc};
use clinic_common::ehr::{NewOrder, ResultItem, ResultOrder, Results, DATA_MODEL_RESULTS, EVENT_TYPE_NEW};

use super::flowsheet::format_date_time;
use super::Addressing;

pub const PATIENT_ALREADY_EXISTS: &str = "patient already exists";
pub const EMAIL_IN_USE: &str = "the email address is already in use";
pub const NO_MATCHING_PATIENT: &str = "no matching patient found";
pub const MULTIPLE_MATCHING_PATIENTS: &str = "multiple matching patients found";
pub const EMAIL_MISSING: &str = "the email address is missing";
pub const EMAIL_INVALID: &str = "the email address is invalid";
pub const PATIENT_DETAILS_INCOMPLETE: &str = "the patient details are incomplete";
pub const INVALID_ORDER: &str = "the order could not be processed";
pub const PROCESSING_FAILED: &str = "the order could not be processed at this time, please place it again";

pub const REPORTS_ENABLED: &str = "Summary reports enabled";
pub const REPORTS_DISABLED: &str = "Summary reports disabled";
pub const ACCOUNT_CREATED: &str = "Account created";

const ORDER_STATUS: &str = "ORDER_STATUS";
const ORDER_MESSAGE: &str = "ORDER_MESSAGE";

/// How an order ended, as reported back to the ordering provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(&'static str),
    Failure(&'static str),
}

impl Outcome {
    fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "SUCCESS",
            Outcome::Failure(_) => "FAILURE",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Success(message) | Outcome::Failure(message) => message,
        }
    }
}

fn item(code: &str, description: &str, value: &str) -> ResultItem {
    ResultItem {
        code: code.to_owned(),
        description: description.to_owned(),
        value: value.to_owned(),
        value_type: "String".to_owned(),
        status: "Final".to_owned(),
    }
}

pub fn build_results(
    addressing: &Addressing,
    order: &NewOrder,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Results {
    let now = format_date_time(now);
    Results {
        meta: addressing.meta(DATA_MODEL_RESULTS, EVENT_TYPE_NEW, &now),
        patient: order.patient.clone(),
        visit: order.visit_reference(),
        orders: vec![ResultOrder {
            id: order.order.id.clone(),
            transaction_date_time: order
                .order
                .transaction_date_time
                .clone()
                .unwrap_or_else(|| now.clone()),
            completion_date_time: now,
            status: "Resulted".to_owned(),
            result_status: "Final".to_owned(),
            procedure: order.order.procedure.clone(),
            provider: order.order.provider.clone(),
            results: vec![
                item(ORDER_STATUS, "Order status", outcome.status()),
                item(ORDER_MESSAGE, "Order message", outcome.message()),
            ],
        }],
    }
}
