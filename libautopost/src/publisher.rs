//! Publishing through the backend that matches the credential

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PublishError;
use crate::platforms::{PostRequest, PostingBackend};
use crate::types::{Caption, Credential, Image, PublishMethod};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub method: PublishMethod,
    pub remote_post_id: String,
}

#[derive(Clone)]
pub struct Publisher {
    session: Arc<dyn PostingBackend>,
    official: Arc<dyn PostingBackend>,
    timeout: Duration,
}

impl Publisher {
    pub fn new(
        session: Arc<dyn PostingBackend>,
        official: Arc<dyn PostingBackend>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            official,
            timeout,
        }
    }

    /// Post one caption (and optional image) for an account
    ///
    /// `slot` is the due time this attempt belongs to; retries for the same
    /// slot carry the same idempotency key. Nothing is persisted here.
    pub async fn publish(
        &self,
        account_id: &str,
        credential: &Credential,
        caption: &Caption,
        image: Option<&Image>,
        slot: i64,
    ) -> Result<PublishResult, PublishError> {
        let method = credential.method();
        let backend = match credential {
            Credential::Session(_) => &self.session,
            Credential::OAuth(_) => &self.official,
        };

        let request = PostRequest {
            account_id: account_id.to_string(),
            credential: credential.clone(),
            text: caption.text.clone(),
            image_url: image.map(|i| i.url.clone()),
            idempotency_key: idempotency_key(account_id, &caption.id, slot),
        };

        let remote = match tokio::time::timeout(self.timeout, backend.post(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PublishError::transient(format!(
                    "{} backend timed out after {:?}",
                    backend.name(),
                    self.timeout
                )))
            }
        };

        tracing::debug!(
            account_id = %account_id,
            method = method.as_str(),
            remote_post_id = %remote.remote_post_id,
            "Backend accepted post"
        );

        Ok(PublishResult {
            method,
            remote_post_id: remote.remote_post_id,
        })
    }
}

/// Hex SHA-256 over account, caption, and due slot
pub fn idempotency_key(account_id: &str, caption_id: &str, slot: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(caption_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(slot.to_be_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
