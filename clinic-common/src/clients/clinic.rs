use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::http::{decode, ClientError, RestClient};
use crate::models::data_source::PatientDataSource;
use crate::models::patient::CreatePatientAccount;
use crate::models::{
    Clinic, Clinician, EhrMatchRequest, EhrMatchResponse, EhrSettings, Patient, PatientSummary,
    Permissions,
};

#[derive(Serialize)]
struct NewPatientTag<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CreatePatientFromUser<'a> {
    permissions: &'a Permissions,
}

/// Client of the clinic API.
#[derive(Clone)]
pub struct ClinicClient {
    rest: RestClient,
}

impl ClinicClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn get_clinic(&self, clinic_id: &str) -> Result<Option<Clinic>, ClientError> {
        self.rest.get_optional(&["v1", "clinics", clinic_id]).await
    }

    pub async fn get_patient(
        &self,
        clinic_id: &str,
        patient_id: &str,
    ) -> Result<Option<Patient>, ClientError> {
        self.rest
            .get_optional(&["v1", "clinics", clinic_id, "patients", patient_id])
            .await
    }

    pub async fn update_patient(
        &self,
        clinic_id: &str,
        patient_id: &str,
        patient: &Patient,
    ) -> Result<(), ClientError> {
        self.rest
            .send_json(
                Method::PUT,
                &["v1", "clinics", clinic_id, "patients", patient_id],
                patient,
                &[],
            )
            .await?;
        Ok(())
    }

    /// Creates a custodial patient account. An existing account (409) counts
    /// as created.
    pub async fn create_patient_account(
        &self,
        clinic_id: &str,
        account: &CreatePatientAccount,
    ) -> Result<(), ClientError> {
        let response = self
            .rest
            .send_json(
                Method::POST,
                &["v1", "clinics", clinic_id, "patients"],
                account,
                &[StatusCode::CONFLICT],
            )
            .await?;
        debug!(clinic_id, status = %response.status(), "patient account created");
        Ok(())
    }

    /// Adds an existing user to the clinic. An existing patient (409) counts
    /// as added.
    pub async fn create_patient_from_user(
        &self,
        clinic_id: &str,
        user_id: &str,
        permissions: &Permissions,
    ) -> Result<(), ClientError> {
        self.rest
            .send_json(
                Method::POST,
                &["v1", "clinics", clinic_id, "migrate", user_id],
                &CreatePatientFromUser { permissions },
                &[StatusCode::CONFLICT],
            )
            .await?;
        Ok(())
    }

    pub async fn get_clinician(
        &self,
        clinic_id: &str,
        clinician_id: &str,
    ) -> Result<Option<Clinician>, ClientError> {
        self.rest
            .get_optional(&["v1", "clinics", clinic_id, "clinicians", clinician_id])
            .await
    }

    pub async fn create_patient_tag(&self, clinic_id: &str, name: &str) -> Result<(), ClientError> {
        self.rest
            .send_json(
                Method::POST,
                &["v1", "clinics", clinic_id, "patient_tags"],
                &NewPatientTag { name },
                &[],
            )
            .await?;
        Ok(())
    }

    /// Removes a deleted tag from every patient of the clinic.
    pub async fn delete_patient_tag_from_patients(
        &self,
        clinic_id: &str,
        tag_id: &str,
    ) -> Result<(), ClientError> {
        self.rest
            .send_empty(
                Method::DELETE,
                &["v1", "clinics", clinic_id, "patients", "patient_tags", tag_id],
                &[],
            )
            .await?;
        Ok(())
    }

    pub async fn match_ehr_patients(
        &self,
        request: &EhrMatchRequest,
    ) -> Result<EhrMatchResponse, ClientError> {
        let response = self
            .rest
            .send_json(Method::POST, &["v1", "redox", "match"], request, &[])
            .await?;
        decode(response).await
    }

    pub async fn get_ehr_settings(&self, clinic_id: &str) -> Result<Option<EhrSettings>, ClientError> {
        self.rest
            .get_optional(&["v1", "clinics", clinic_id, "settings", "ehr"])
            .await
    }

    pub async fn update_patient_summary(
        &self,
        user_id: &str,
        summary: &PatientSummary,
    ) -> Result<(), ClientError> {
        self.rest
            .send_json(Method::PUT, &["v1", "patients", user_id, "summary"], summary, &[])
            .await?;
        Ok(())
    }

    pub async fn delete_patient_summary(&self, summary_id: &str) -> Result<(), ClientError> {
        self.rest
            .send_empty(Method::DELETE, &["v1", "summaries", summary_id], &[])
            .await?;
        Ok(())
    }

    pub async fn update_patient_data_sources(
        &self,
        user_id: &str,
        data_sources: &[PatientDataSource],
    ) -> Result<(), ClientError> {
        self.rest
            .send_json(
                Method::PUT,
                &["v1", "patients", user_id, "data_sources"],
                data_sources,
                &[],
            )
            .await?;
        Ok(())
    }

    pub async fn trigger_ehr_sync(&self, user_id: &str) -> Result<(), ClientError> {
        self.rest
            .send_empty(Method::POST, &["v1", "patients", user_id, "ehr", "sync"], &[])
            .await?;
        Ok(())
    }

    pub async fn delete_user_from_clinics(&self, user_id: &str) -> Result<(), ClientError> {
        self.rest
            .send_empty(Method::DELETE, &["v1", "users", user_id, "clinics"], &[])
            .await?;
        Ok(())
    }
}
