use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;

use super::http::{ClientError, RestClient};
use crate::models::BgUnits;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    pub user_id: String,
    pub full_name: String,
    pub dob: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tz_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_units: Option<BgUnits>,
    pub reports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub user_detail: UserDetail,
    pub report_detail: ReportDetail,
}

/// Client of the report exporter, which renders PDF reports.
#[derive(Clone)]
pub struct ReportsClient {
    rest: RestClient,
}

impl ReportsClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Renders the report and returns the PDF bytes.
    pub async fn generate_report(&self, request: &ReportRequest) -> Result<Vec<u8>, ClientError> {
        let response = self
            .rest
            .send_json(
                Method::POST,
                &["export", "report", &request.user_detail.user_id],
                request,
                &[],
            )
            .await?;
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|error| ClientError::Decode {
                url,
                reason: error.to_string(),
            })?;
        Ok(body.to_vec())
    }
}
