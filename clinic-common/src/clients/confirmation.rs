use reqwest::{Method, StatusCode};

use super::http::{ClientError, RestClient};

/// Client of the confirmation service.
#[derive(Clone)]
pub struct ConfirmationClient {
    rest: RestClient,
}

impl ConfirmationClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Creates or refreshes the sign-up invitation of a custodial user. An
    /// invitation that already exists (409) is left as is.
    pub async fn upsert_signup_invite(&self, user_id: &str) -> Result<(), ClientError> {
        self.rest
            .send_empty(
                Method::POST,
                &["confirm", "send", "signup", user_id],
                &[StatusCode::CONFLICT],
            )
            .await?;
        Ok(())
    }
}
