use std::time;

use reqwest::{header, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::session::{ServerSession, SESSION_TOKEN_HEADER};
use super::token::TokenError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid base url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),
    #[error("{method} {url} failed: {error}")]
    Transport {
        method: Method,
        url: String,
        error: reqwest::Error,
    },
    #[error("{method} {url} returned unexpected status {status}: {body}")]
    UnexpectedStatus {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response of {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("token error: {0}")]
    Token(#[from] TokenError),
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Configuration errors never heal by themselves, everything else might.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            ClientError::InvalidUrl { .. }
                | ClientError::Build(_)
                | ClientError::Token(TokenError::InvalidKey(_))
        )
    }
}

/// The HTTP client shared by every service client.
pub fn build_http_client(
    request_timeout: time::Duration,
    user_agent: &str,
) -> Result<reqwest::Client, ClientError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(user_agent)
        .timeout(request_timeout)
        .build()
        .map_err(ClientError::Build)
}

/// A base url plus the shared HTTP client, optionally authenticated with the
/// server session token.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    session: Option<ServerSession>,
}

impl RestClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|error| ClientError::InvalidUrl {
            url: base_url.to_owned(),
            reason: error.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base url".to_owned(),
            });
        }

        Ok(Self {
            http,
            base_url,
            session: None,
        })
    }

    pub fn with_session(mut self, session: ServerSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Appends percent-encoded `segments` to the base url.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub async fn request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, ClientError> {
        let builder = self.http.request(method, self.url(segments));
        match &self.session {
            Some(session) => Ok(builder.header(SESSION_TOKEN_HEADER, session.token().await?)),
            None => Ok(builder),
        }
    }

    /// Sends the request. Success statuses and the `accepted` ones are returned
    /// as is, any other status becomes `UnexpectedStatus`.
    pub async fn execute(
        &self,
        builder: RequestBuilder,
        accepted: &[StatusCode],
    ) -> Result<Response, ClientError> {
        let (client, request) = builder.build_split();
        let request = request.map_err(ClientError::Build)?;
        let method = request.method().clone();
        let url = request.url().to_string();

        debug!(%method, %url, "sending request");
        let response = client
            .execute(request)
            .await
            .map_err(|error| ClientError::Transport {
                method: method.clone(),
                url: url.clone(),
                error,
            })?;

        let status = response.status();
        if status.is_success() || accepted.contains(&status) {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|index| body.is_char_boundary(*index))
                .unwrap_or(0);
            body.truncate(cut);
        }

        Err(ClientError::UnexpectedStatus {
            method,
            url,
            status,
            body,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let response = self
            .execute(self.request(Method::GET, segments).await?, &[])
            .await?;
        decode(response).await
    }

    /// Like `get`, with 404 mapped to `None`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<Option<T>, ClientError> {
        match self.get(segments).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
        accepted: &[StatusCode],
    ) -> Result<Response, ClientError> {
        let builder = self.request(method, segments).await?.json(body);
        self.execute(builder, accepted).await
    }

    pub async fn send_empty(
        &self,
        method: Method,
        segments: &[&str],
        accepted: &[StatusCode],
    ) -> Result<Response, ClientError> {
        let builder = self.request(method, segments).await?;
        self.execute(builder, accepted).await
    }
}

/// Decodes a JSON body. An empty body is an error.
pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let url = response.url().to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ClientError::Decode {
            url: url.clone(),
            reason: error.to_string(),
        })?;
    if bytes.is_empty() {
        return Err(ClientError::Decode {
            url,
            reason: "empty body".to_owned(),
        });
    }
    serde_json::from_slice(&bytes).map_err(|error| ClientError::Decode {
        url,
        reason: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    fn client(server: &MockServer) -> RestClient {
        let http = build_http_client(time::Duration::from_secs(5), "clinic-worker-test").unwrap();
        RestClient::new(http, &server.base_url()).unwrap()
    }

    #[test]
    fn segments_are_percent_encoded() {
        let http = build_http_client(time::Duration::from_secs(5), "test").unwrap();
        let client = RestClient::new(http, "http://users.local/api/").unwrap();

        assert_eq!(
            client.url(&["auth", "user", "jane+1@example.com"]).as_str(),
            "http://users.local/api/auth/user/jane+1@example.com"
        );
        assert_eq!(
            client.url(&["tags", "a/b c"]).as_str(),
            "http://users.local/api/tags/a%2Fb%20c"
        );
    }

    #[tokio::test]
    async fn not_found_is_none() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/v1/clinics/c1");
            then.status(404);
        });

        let clinic: Option<Value> = client(&server).get_optional(&["v1", "clinics", "c1"]).await.unwrap();

        mock.assert();
        assert!(clinic.is_none());
    }

    #[tokio::test]
    async fn unexpected_status_keeps_the_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/v1/patients/u1/summary");
            then.status(503).body("try later");
        });

        let error = client(&server)
            .send_json(Method::PUT, &["v1", "patients", "u1", "summary"], &json!({}), &[])
            .await
            .unwrap_err();

        assert_eq!(error.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert!(error.is_retriable());
        assert!(error.to_string().contains("try later"));
    }

    #[tokio::test]
    async fn accepted_statuses_pass() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/clinics/c1/patients");
            then.status(409);
        });

        let response = client(&server)
            .send_json(
                Method::POST,
                &["v1", "clinics", "c1", "patients"],
                &json!({"fullName": "Jane"}),
                &[StatusCode::CONFLICT],
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn empty_bodies_do_not_decode() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/redox/match");
            then.status(200);
        });

        let client = client(&server);
        let response = client
            .send_json(Method::POST, &["v1", "redox", "match"], &json!({}), &[])
            .await
            .unwrap();
        let decoded: Result<Value, _> = decode(response).await;

        assert!(matches!(decoded, Err(ClientError::Decode { .. })));
    }
}
