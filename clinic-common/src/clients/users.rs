use super::http::{ClientError, RestClient};
use crate::models::User;

/// Client of the user directory.
#[derive(Clone)]
pub struct UserClient {
    rest: RestClient,
}

impl UserClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    /// Looks a user up by id or email. `None` means the user does not exist,
    /// or was deleted.
    pub async fn get_user(&self, id_or_email: &str) -> Result<Option<User>, ClientError> {
        self.rest.get_optional(&["auth", "user", id_or_email]).await
    }
}
