use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::json;

use super::http::{ClientError, RestClient};
use crate::models::Permissions;

/// Client of the data sharing service.
#[derive(Clone)]
pub struct SharingClient {
    rest: RestClient,
}

impl SharingClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Users sharing their data with `user_id`, and what they granted.
    /// `user_id` itself is left out.
    pub async fn list_shared_with(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<String, Permissions>, ClientError> {
        let mut groups: BTreeMap<String, Permissions> = self
            .rest
            .get_optional(&["access", "groups", user_id])
            .await?
            .unwrap_or_default();

        groups.remove(user_id);
        Ok(groups)
    }

    /// Withdraws every permission `grantor` gave to `grantee`.
    pub async fn revoke(&self, grantor: &str, grantee: &str) -> Result<(), ClientError> {
        self.rest
            .send_json(Method::POST, &["access", grantor, grantee], &json!({}), &[])
            .await?;
        Ok(())
    }
}
