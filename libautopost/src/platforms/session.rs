//! Session-emulated posting client
//!
//! Replays the stored browser session (cookie blob) against the web
//! client's internal endpoint.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use secrecy::ExposeSecret;

use super::{endpoint, execute, PostBody, PostRequest, PostingBackend, RemotePost, IDEMPOTENCY_HEADER};
use crate::error::PublishError;
use crate::types::Credential;

const POST_PATH: &str = "/web/posts";

pub struct SessionClient {
    client: reqwest::Client,
    base_url: String,
}

impl SessionClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PostingBackend for SessionClient {
    fn name(&self) -> &str {
        "session"
    }

    async fn post(&self, request: &PostRequest) -> Result<RemotePost, PublishError> {
        let session = match &request.credential {
            Credential::Session(session) => session,
            Credential::OAuth(_) => {
                return Err(PublishError::rejected(
                    "session backend cannot use an OAuth credential",
                ))
            }
        };
        if self.base_url.is_empty() {
            return Err(PublishError::rejected("session backend is not configured"));
        }

        let body = PostBody {
            text: &request.text,
            image_url: request.image_url.as_deref(),
        };

        tracing::debug!(account_id = %request.account_id, "Posting through session client");

        let builder = self
            .client
            .post(endpoint(&self.base_url, POST_PATH))
            .header(COOKIE, session.blob.expose_secret())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&body);

        execute(builder).await
    }
}
