use reqwest::Method;
use tracing::debug;

use super::http::{ClientError, RestClient};

/// Client of the marketing platform shim. When disabled every call is a no-op.
#[derive(Clone)]
pub struct MarketingClient {
    rest: RestClient,
    enabled: bool,
}

impl MarketingClient {
    pub fn new(rest: RestClient, enabled: bool) -> Self {
        Self { rest, enabled }
    }

    /// Asks the platform to resync the user's attributes.
    pub async fn refresh_user(&self, user_id: &str) -> Result<(), ClientError> {
        if !self.enabled {
            debug!(user_id, "marketing refresh disabled");
            return Ok(());
        }

        self.rest
            .send_empty(Method::POST, &["v1", "users", user_id, "marketo"], &[])
            .await?;
        Ok(())
    }
}
