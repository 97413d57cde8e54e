use reqwest::Method;
use serde_json::{Map, Value};

use super::http::{ClientError, RestClient};

pub type Profile = Map<String, Value>;

/// Client of the metadata store, restricted to the `profile` collection.
/// Profiles are handled as raw maps so unknown keys survive a read-modify-write.
#[derive(Clone)]
pub struct ProfileClient {
    rest: RestClient,
}

impl ProfileClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, ClientError> {
        self.rest
            .get_optional(&["metadata", user_id, "profile"])
            .await
    }

    pub async fn put_profile(&self, user_id: &str, profile: &Profile) -> Result<(), ClientError> {
        self.rest
            .send_json(Method::PUT, &["metadata", user_id, "profile"], profile, &[])
            .await?;
        Ok(())
    }
}
