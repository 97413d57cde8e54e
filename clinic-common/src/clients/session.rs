use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Url};
use tracing::info;

use super::http::{ClientError, RestClient};
use super::token::{CachedToken, TokenCache, TokenError};

pub const SESSION_TOKEN_HEADER: &str = "X-Tidepool-Session-Token";
const SERVER_NAME_HEADER: &str = "X-Tidepool-Server-Name";
const SERVER_SECRET_HEADER: &str = "X-Tidepool-Server-Secret";

/// Shorter than the server side token expiry.
const SESSION_LIFETIME: Duration = Duration::from_secs(3600);

struct Inner {
    http: reqwest::Client,
    login_url: Url,
    server_name: String,
    secret: String,
    tokens: TokenCache,
}

/// Server to server session with the user directory, shared by every client
/// calling internal services.
#[derive(Clone)]
pub struct ServerSession {
    inner: Arc<Inner>,
}

impl ServerSession {
    pub fn new(
        http: reqwest::Client,
        auth_base_url: &str,
        server_name: &str,
        secret: &str,
    ) -> Result<Self, ClientError> {
        let login_url = RestClient::new(http.clone(), auth_base_url)?.url(&["auth", "serverlogin"]);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                login_url,
                server_name: server_name.to_owned(),
                secret: secret.to_owned(),
                tokens: TokenCache::new(),
            }),
        })
    }

    pub async fn token(&self) -> Result<String, ClientError> {
        self.inner.tokens.get_or_refresh(|| self.login()).await
    }

    async fn login(&self) -> Result<CachedToken, ClientError> {
        let response = self
            .inner
            .http
            .request(Method::POST, self.inner.login_url.clone())
            .header(SERVER_NAME_HEADER, &self.inner.server_name)
            .header(SERVER_SECRET_HEADER, &self.inner.secret)
            .send()
            .await
            .map_err(TokenError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected { status, body }.into());
        }

        let token = response
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| TokenError::MissingToken(SESSION_TOKEN_HEADER.to_owned()))?
            .to_owned();

        info!(server = %self.inner.server_name, "obtained server session token");
        Ok(CachedToken::new(token, SESSION_LIFETIME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::http::build_http_client;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn token_is_cached_and_sent_to_services() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/serverlogin")
                .header(SERVER_NAME_HEADER, "clinic-worker")
                .header(SERVER_SECRET_HEADER, "s3cret");
            then.status(200).header(SESSION_TOKEN_HEADER, "session-1");
        });
        let profile = server.mock(|when, then| {
            when.method(GET)
                .path("/metadata/u1/profile")
                .header(SESSION_TOKEN_HEADER, "session-1");
            then.status(200).json_body(serde_json::json!({"fullName": "Jane"}));
        });

        let http = build_http_client(Duration::from_secs(5), "test").unwrap();
        let session =
            ServerSession::new(http.clone(), &server.base_url(), "clinic-worker", "s3cret").unwrap();
        let client = RestClient::new(http, &server.base_url())
            .unwrap()
            .with_session(session);

        for _ in 0..3 {
            let _profile: serde_json::Value =
                client.get(&["metadata", "u1", "profile"]).await.unwrap();
        }

        login.assert_hits(1);
        profile.assert_hits(3);
    }

    #[tokio::test]
    async fn rejected_login_surfaces_as_token_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth/serverlogin");
            then.status(401);
        });

        let http = build_http_client(Duration::from_secs(5), "test").unwrap();
        let session = ServerSession::new(http, &server.base_url(), "clinic-worker", "wrong").unwrap();

        let error = session.token().await.unwrap_err();
        assert!(matches!(
            error,
            ClientError::Token(TokenError::Rejected { status, .. }) if status == reqwest::StatusCode::UNAUTHORIZED
        ));
    }
}
