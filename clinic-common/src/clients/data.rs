use super::http::{ClientError, RestClient};
use crate::models::DataSource;

/// Client of the data service.
#[derive(Clone)]
pub struct DataClient {
    rest: RestClient,
}

impl DataClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Data sources of a user, empty when the user has none or is unknown.
    pub async fn list_data_sources(&self, user_id: &str) -> Result<Vec<DataSource>, ClientError> {
        Ok(self
            .rest
            .get_optional(&["v1", "users", user_id, "data_sources"])
            .await?
            .unwrap_or_default())
    }
}
