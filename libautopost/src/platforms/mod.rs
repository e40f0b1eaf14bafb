//! Posting backends
//!
//! Two transports reach the same platform: an emulated client that replays
//! a browser session, and the official REST API authorized with OAuth. Both
//! implement [`PostingBackend`] and report failures as a [`PublishError`], so
//! callers never see transport-specific errors.
//!
//! HTTP status codes are classified the same way for both backends:
//!
//! | Status         | Kind                |
//! |----------------|---------------------|
//! | 429            | `RateLimited`       |
//! | 401, 403       | `AuthExpired`       |
//! | 5xx            | `TransientNetwork`  |
//! | other 4xx      | `PermanentRejected` |

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PublishError;
use crate::types::Credential;

pub mod official;
pub mod session;

// Available outside cfg(test) so integration tests and the binary's tests can use it
pub mod mock;

/// Header carrying the per-slot dedup hint
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Everything a backend needs to create one post
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub account_id: String,
    pub credential: Credential,
    pub text: String,
    pub image_url: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePost {
    pub remote_post_id: String,
}

#[async_trait]
pub trait PostingBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn post(&self, request: &PostRequest) -> Result<RemotePost, PublishError>;
}

/// JSON body sent by both HTTP backends
#[derive(Debug, Serialize)]
pub(crate) struct PostBody<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[serde(alias = "post_id")]
    id: String,
}

/// Send a prepared request and normalize the outcome
pub(crate) async fn execute(builder: reqwest::RequestBuilder) -> Result<RemotePost, PublishError> {
    let response = builder.send().await.map_err(|e| classify_transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, retry_after, &body));
    }

    let parsed: PostResponse = response
        .json()
        .await
        .map_err(|e| PublishError::transient(format!("unreadable response body: {}", e)))?;

    Ok(RemotePost {
        remote_post_id: parsed.id,
    })
}

/// Map a non-success HTTP status to a publish error
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> PublishError {
    let snippet: String = body.chars().take(200).collect();
    let message = if snippet.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), snippet)
    };

    match status.as_u16() {
        429 => PublishError::rate_limited(message, retry_after),
        401 | 403 => PublishError::auth_expired(message),
        500..=599 => PublishError::transient(message),
        _ => PublishError::rejected(message),
    }
}

/// Map a transport failure (no HTTP status) to a publish error
pub fn classify_transport(error: &reqwest::Error) -> PublishError {
    if error.is_builder() {
        PublishError::rejected(format!("invalid request: {}", error))
    } else {
        PublishError::transient(format!("network error: {}", error))
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Join a configured base URL and a path without doubling slashes
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), "");
        assert_eq!(
            err.kind,
            PublishErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(err.message, "HTTP 429");

        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None, "").kind,
            PublishErrorKind::AuthExpired
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None, "").kind,
            PublishErrorKind::AuthExpired
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, None, "").kind,
            PublishErrorKind::TransientNetwork
        );
        let rejected = classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "caption too long");
        assert_eq!(rejected.kind, PublishErrorKind::PermanentRejected);
        assert!(rejected.message.contains("caption too long"));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.example.com/", "/v1/posts"),
            "https://api.example.com/v1/posts"
        );
        assert_eq!(
            endpoint("https://api.example.com", "v1/posts"),
            "https://api.example.com/v1/posts"
        );
    }

    #[test]
    fn test_post_response_accepts_either_id_field() {
        let a: PostResponse = serde_json::from_str(r#"{"id":"123"}"#).unwrap();
        let b: PostResponse = serde_json::from_str(r#"{"post_id":"456"}"#).unwrap();
        assert_eq!(a.id, "123");
        assert_eq!(b.id, "456");
    }
}
