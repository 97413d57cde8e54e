use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::common::{Meta, Patient, Procedure, Provider, Visit};

const MRN_ID_TYPE: &str = "MRN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClinicalInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codeset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Order {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Procedure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clinical_info: Vec<ClinicalInfo>,
}

/// A new order placed by a provider in the EHR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NewOrder {
    pub meta: Meta,
    pub patient: Patient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit: Option<Visit>,
    pub order: Order,
}

impl NewOrder {
    pub fn procedure_code(&self) -> Option<&str> {
        self.order
            .procedure
            .as_ref()
            .and_then(|procedure| procedure.code.as_deref())
    }

    /// The first identifier typed as a medical record number.
    pub fn mrn(&self) -> Option<&str> {
        self.patient
            .identifiers
            .iter()
            .find(|identifier| identifier.id_type.eq_ignore_ascii_case(MRN_ID_TYPE))
            .map(|identifier| identifier.id.as_str())
            .filter(|mrn| !mrn.is_empty())
    }

    pub fn full_name(&self) -> Option<String> {
        self.patient
            .demographics
            .as_ref()
            .and_then(|demographics| demographics.full_name())
    }

    /// Date of birth as `YYYY-MM-DD`. The gateway sends either a date or a
    /// full timestamp.
    pub fn birth_date(&self) -> Option<NaiveDate> {
        let dob = self.patient.demographics.as_ref()?.dob.as_deref()?;
        let date = dob.get(..10).unwrap_or(dob);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }

    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let birth = self.birth_date()?;
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        u32::try_from(age).ok()
    }

    pub fn patient_email(&self) -> Option<&str> {
        self.patient
            .demographics
            .as_ref()
            .and_then(|demographics| demographics.email_addresses.first())
            .map(String::as_str)
    }

    pub fn guarantor_email(&self) -> Option<&str> {
        self.visit
            .as_ref()
            .and_then(|visit| visit.guarantor.as_ref())
            .and_then(|guarantor| guarantor.email_addresses.first())
            .map(String::as_str)
    }

    pub fn visit_reference(&self) -> Option<Visit> {
        self.visit.as_ref().map(Visit::reference)
    }
}
