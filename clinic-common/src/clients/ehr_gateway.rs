//! Client of the EHR interoperability gateway.
//!
//! Authentication follows the OAuth 2 client credentials flow with a signed
//! JWT client assertion (RFC 7523): the worker signs a short lived assertion
//! with its RSA key, exchanges it for an access token and reuses that token
//! until shortly before it expires.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::http::{decode, ClientError, RestClient};
use super::token::{CachedToken, TokenCache, TokenError};
use crate::ehr::Endpoint;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct EhrGatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub key_id: String,
    pub private_key_pem: String,
    pub source_id: String,
    pub source_name: String,
    pub test_mode: bool,
    pub upload_file_enabled: bool,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_assertion_type: &'static str,
    client_assertion: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "URI")]
    uri: String,
}

pub struct EhrGatewayClient {
    rest: RestClient,
    token_url: Url,
    client_id: String,
    key_id: String,
    signing_key: EncodingKey,
    tokens: TokenCache,
    source: Endpoint,
    test_mode: bool,
    upload_file_enabled: bool,
}

impl EhrGatewayClient {
    /// Fails when the base url or the private key cannot be parsed.
    pub fn new(http: reqwest::Client, config: &EhrGatewayConfig) -> Result<Self, ClientError> {
        let rest = RestClient::new(http, &config.base_url)?;
        let signing_key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes())
            .map_err(TokenError::InvalidKey)?;

        Ok(Self {
            token_url: rest.url(&["v2", "auth", "token"]),
            rest,
            client_id: config.client_id.clone(),
            key_id: config.key_id.clone(),
            signing_key,
            tokens: TokenCache::new(),
            source: Endpoint {
                id: Some(config.source_id.clone()),
                name: Some(config.source_name.clone()),
            },
            test_mode: config.test_mode,
            upload_file_enabled: config.upload_file_enabled,
        })
    }

    /// The endpoint outbound documents are sent from.
    pub fn source(&self) -> Endpoint {
        self.source.clone()
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Whether report files are uploaded and referenced by uri instead of
    /// being embedded in the notes.
    pub fn upload_file_enabled(&self) -> bool {
        self.upload_file_enabled
    }

    fn assertion(&self) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_id,
            sub: &self.client_id,
            aud: self.token_url.as_str(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECONDS,
            jti: Uuid::new_v4().to_string(),
        };
        let header = Header {
            kid: Some(self.key_id.clone()),
            ..Header::new(Algorithm::RS384)
        };

        jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(TokenError::Signing)
    }

    async fn fetch_token(&self) -> Result<CachedToken, TokenError> {
        let assertion = self.assertion()?;
        let response = self
            .rest
            .http()
            .post(self.token_url.clone())
            .form(&TokenRequest {
                grant_type: "client_credentials",
                client_assertion_type: CLIENT_ASSERTION_TYPE,
                client_assertion: &assertion,
            })
            .send()
            .await
            .map_err(TokenError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected { status, body });
        }

        let body = response.text().await.map_err(TokenError::Request)?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|_| TokenError::MissingToken(body.clone()))?;
        let (Some(access_token), Some(expires_in)) = (token.access_token, token.expires_in) else {
            return Err(TokenError::MissingToken(body));
        };

        info!(expires_in, "obtained ehr gateway access token");
        Ok(CachedToken::new(
            access_token,
            Duration::from_secs(expires_in),
        ))
    }

    pub async fn access_token(&self) -> Result<String, TokenError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn authorized(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let token = self.access_token().await?;
        Ok(self.rest.request(method, segments).await?.bearer_auth(token))
    }

    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let result = self.rest.execute(builder, &[]).await;
        if let Err(error) = &result {
            if error.status() == Some(StatusCode::UNAUTHORIZED) {
                warn!("ehr gateway rejected the access token, dropping it");
                self.tokens.invalidate().await;
            }
        }
        result
    }

    /// Sends a flowsheet, notes or results document.
    pub async fn send<T: Serialize + ?Sized>(&self, document: &T) -> Result<(), ClientError> {
        let builder = self.authorized(Method::POST, &["endpoint"]).await?.json(document);
        self.execute(builder).await?;
        debug!("document sent to ehr gateway");
        Ok(())
    }

    /// Uploads a file to the gateway blob storage and returns its uri.
    pub async fn upload_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, ClientError> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_owned())
            .mime_str(mime_type)
            .map_err(ClientError::Build)?;
        let builder = self
            .authorized(Method::POST, &["upload"])
            .await?
            .multipart(Form::new().part("file", part));

        let response = self.execute(builder).await?;
        let uploaded: UploadResponse = decode(response).await?;
        Ok(uploaded.uri)
    }
}
