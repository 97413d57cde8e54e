use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Tokens are refreshed this long before they actually expire.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid signing key: {0}")]
    InvalidKey(jsonwebtoken::errors::Error),
    #[error("failed to sign assertion: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("token request failed: {0}")]
    Request(reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("token response has no token: {0}")]
    MissingToken(String),
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn new(value: String, lifetime: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

/// A single token shared by every caller. The lock is held while refreshing,
/// so concurrent callers wait for the one refresh in flight instead of
/// starting their own.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedToken, E>>,
    {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let token = refresh().await?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    /// Drops the cached token, e.g. after the server rejected it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}
