//! OAuth2 token refresh

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::OAuthConfig;
use crate::error::CredentialError;

/// Fresh tokens issued by the provider
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<SecretString>,
    pub expires_at: i64,
}

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, CredentialError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// `refresh_token` grant against a standard OAuth2 token endpoint
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    config: OAuthConfig,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client, config: OAuthConfig) -> Self {
        Self { client, config }
    }
}

/// Tokens without `expires_in` are assumed to live for an hour
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3_600;

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, CredentialError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CredentialError::RefreshFailed(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::RefreshFailed(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::RefreshFailed(format!("invalid token response: {}", e)))?;

        let expires_at = chrono::Utc::now().timestamp()
            + token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(TokenGrant {
            access_token: SecretString::from(token.access_token),
            refresh_token: token.refresh_token.map(SecretString::from),
            expires_at,
        })
    }
}

/// Used when no `[oauth]` table is configured; every refresh fails
pub struct DisabledRefresher;

#[async_trait]
impl TokenRefresher for DisabledRefresher {
    async fn refresh(&self, _refresh_token: &SecretString) -> Result<TokenGrant, CredentialError> {
        Err(CredentialError::RefreshFailed(
            "OAuth is not configured".to_string(),
        ))
    }
}

/// Scripted refresher for tests
///
/// Returns queued results in order; once the queue is empty every call
/// yields a grant expiring an hour after the call.
#[derive(Clone, Default)]
pub struct MockRefresher {
    responses: Arc<Mutex<VecDeque<Result<TokenGrant, CredentialError>>>>,
    call_count: Arc<Mutex<usize>>,
    delay: Option<Duration>,
}

impl MockRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, response: Result<TokenGrant, CredentialError>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.lock().map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, _refresh_token: &SecretString) -> Result<TokenGrant, CredentialError> {
        if let Ok(mut count) = self.call_count.lock() {
            *count += 1;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(response) => response,
            None => Ok(TokenGrant {
                access_token: SecretString::from("mock-access-token".to_string()),
                refresh_token: None,
                expires_at: chrono::Utc::now().timestamp() + DEFAULT_TOKEN_LIFETIME_SECS,
            }),
        }
    }
}
