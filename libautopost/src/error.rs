//! Error types for Autopost

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutopostError>;

#[derive(Error, Debug)]
pub enum AutopostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Content exhausted: {0}")]
    ContentExhausted(#[from] ContentExhausted),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AutopostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AutopostError::Config(_) => 2,
            AutopostError::InvalidInput(_) => 3,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// No unused caption is left in the pool
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no unused captions remain")]
pub struct ContentExhausted;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("account is not connected")]
    NotConnected,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Classification of a failed publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishErrorKind {
    /// The platform throttled us; `retry_after` is its suggested wait
    RateLimited { retry_after: Option<Duration> },
    /// Credentials were rejected; the account must be reconnected
    AuthExpired,
    /// Connection failures, timeouts, and 5xx responses
    TransientNetwork,
    /// The platform refused the content itself
    PermanentRejected,
}

impl PublishErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishErrorKind::RateLimited { .. } | PublishErrorKind::TransientNetwork
        )
    }
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishErrorKind::RateLimited { .. } => write!(f, "rate limited"),
            PublishErrorKind::AuthExpired => write!(f, "auth expired"),
            PublishErrorKind::TransientNetwork => write!(f, "transient network error"),
            PublishErrorKind::PermanentRejected => write!(f, "rejected"),
        }
    }
}

/// Normalized error shape shared by every posting backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::new(PublishErrorKind::RateLimited { retry_after }, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::AuthExpired, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::TransientNetwork, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::PermanentRejected, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
