use serde::{Deserialize, Serialize};

pub const DELETE_USER_EVENT_TYPE: &str = "users:delete";

/// A user as returned by the user directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email_verified: bool,
}

impl User {
    pub fn email(&self) -> Option<&str> {
        self.emails
            .first()
            .or(self.username.as_ref())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletedUser {
    #[serde(rename = "userid")]
    pub user_id: String,
}

/// Body of the CloudEvent published when a user account is deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteUserEvent {
    pub user: DeletedUser,
}

/// Structured mode CloudEvent, binary mode events only carry the body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredCloudEvent<T> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: T,
}
