//! Official REST API client, authorized with an OAuth bearer token

use async_trait::async_trait;
use secrecy::ExposeSecret;

use super::{endpoint, execute, PostBody, PostRequest, PostingBackend, RemotePost, IDEMPOTENCY_HEADER};
use crate::error::PublishError;
use crate::types::Credential;

const POST_PATH: &str = "/v1/posts";

pub struct OfficialApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl OfficialApiClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PostingBackend for OfficialApiClient {
    fn name(&self) -> &str {
        "official"
    }

    async fn post(&self, request: &PostRequest) -> Result<RemotePost, PublishError> {
        let oauth = match &request.credential {
            Credential::OAuth(oauth) => oauth,
            Credential::Session(_) => {
                return Err(PublishError::rejected(
                    "official API cannot use a session credential",
                ))
            }
        };
        if self.base_url.is_empty() {
            return Err(PublishError::rejected("official API is not configured"));
        }

        let body = PostBody {
            text: &request.text,
            image_url: request.image_url.as_deref(),
        };

        tracing::debug!(account_id = %request.account_id, "Posting through official API");

        let builder = self
            .client
            .post(endpoint(&self.base_url, POST_PATH))
            .bearer_auth(oauth.access_token.expose_secret())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&body);

        execute(builder).await
    }
}
