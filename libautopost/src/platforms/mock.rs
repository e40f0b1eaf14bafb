//! Mock posting backend for testing
//!
//! Replays a scripted sequence of results and records every request it
//! receives, so scheduler tests can assert on retries, idempotency keys,
//! and content without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{PostRequest, PostingBackend, RemotePost};
use crate::error::PublishError;

/// What the mock saw for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub account_id: String,
    pub text: String,
    pub image_url: Option<String>,
    pub idempotency_key: String,
}

/// Scripted backend; clones share their script and call log
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    script: Arc<Mutex<VecDeque<Result<RemotePost, PublishError>>>>,
    calls: Arc<Mutex<Vec<RecordedPost>>>,
    delay: Duration,
}

impl MockBackend {
    /// A backend that succeeds on every call unless results are queued
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// A backend that returns `error` for the first `times` calls
    pub fn failing(name: &str, error: PublishError, times: usize) -> Self {
        let backend = Self::new(name);
        for _ in 0..times {
            backend.push_result(Err(error.clone()));
        }
        backend
    }

    /// Sleep before answering, to exercise timeouts and deadlines
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_result(&self, result: Result<RemotePost, PublishError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RecordedPost> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PostingBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn post(&self, request: &PostRequest) -> Result<RemotePost, PublishError> {
        let call_number = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(RecordedPost {
                    account_id: request.account_id.clone(),
                    text: request.text.clone(),
                    image_url: request.image_url.clone(),
                    idempotency_key: request.idempotency_key.clone(),
                });
                calls.len()
            }
            Err(_) => 0,
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(RemotePost {
                remote_post_id: format!("{}-post-{}", self.name, call_number),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Credential, SessionCredential};
    use secrecy::SecretString;

    fn request() -> PostRequest {
        PostRequest {
            account_id: "acct".to_string(),
            credential: Credential::Session(SessionCredential {
                blob: SecretString::from("sid".to_string()),
            }),
            text: "hello".to_string(),
            image_url: None,
            idempotency_key: "k1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_default_success() {
        let backend = MockBackend::new("mock");
        let post = backend.post(&request()).await.unwrap();
        assert_eq!(post.remote_post_id, "mock-post-1");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls()[0].idempotency_key, "k1");
    }

    #[tokio::test]
    async fn test_failing_then_success() {
        let backend = MockBackend::failing("mock", PublishError::transient("reset"), 2);
        let clone = backend.clone();

        assert!(backend.post(&request()).await.is_err());
        assert!(clone.post(&request()).await.is_err());
        assert!(backend.post(&request()).await.is_ok());
        assert_eq!(clone.call_count(), 3);
    }
}
