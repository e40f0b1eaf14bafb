//! Core types for Autopost

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Accounts
// ============================================================================

/// How an account is connected to the platform
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    ConnectedSession,
    ConnectedOfficial,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectedSession => "connected_session",
            ConnectionState::ConnectedOfficial => "connected_official",
        }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(ConnectionState::Disconnected),
            "connected_session" => Ok(ConnectionState::ConnectedSession),
            "connected_official" => Ok(ConnectionState::ConnectedOfficial),
            other => Err(format!("unknown connection state '{}'", other)),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque cookie/session blob for the emulated client
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub blob: SecretString,
}

#[derive(Debug, Clone)]
pub struct OAuthCredential {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: i64,
}

/// A credential ready to be handed to the publisher
#[derive(Debug, Clone)]
pub enum Credential {
    Session(SessionCredential),
    OAuth(OAuthCredential),
}

impl Credential {
    pub fn method(&self) -> PublishMethod {
        match self {
            Credential::Session(_) => PublishMethod::Session,
            Credential::OAuth(_) => PublishMethod::Official,
        }
    }
}

/// Which backend carried a post
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishMethod {
    Session,
    Official,
}

impl PublishMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMethod::Session => "session",
            PublishMethod::Official => "official",
        }
    }
}

impl std::str::FromStr for PublishMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(PublishMethod::Session),
            "official" => Ok(PublishMethod::Official),
            other => Err(format!("unknown publish method '{}'", other)),
        }
    }
}

/// Longest allowed gap between scheduled posts (one year)
pub const MAX_CADENCE_MINUTES: i64 = 525_600;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub description: String,
    pub autopilot_enabled: bool,
    pub cadence_minutes: i64,
    pub next_run_at: Option<i64>,
    pub last_posted_at: Option<i64>,
    pub connection_state: ConnectionState,
    pub session_credential: Option<SessionCredential>,
    pub oauth_credential: Option<OAuthCredential>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl Account {
    /// A fresh, disconnected account with autopilot off
    pub fn new(username: impl Into<String>, cadence_minutes: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            description: String::new(),
            autopilot_enabled: false,
            cadence_minutes,
            next_run_at: None,
            last_posted_at: None,
            connection_state: ConnectionState::Disconnected,
            session_credential: None,
            oauth_credential: None,
            last_error: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn scheduling_status(&self, now: i64) -> SchedulingStatus {
        match self.next_run_at {
            None => SchedulingStatus::Idle,
            Some(at) if at <= now => SchedulingStatus::Due,
            Some(_) => SchedulingStatus::Scheduled,
        }
    }

    /// True when the scheduler should pick this account up at `now`
    pub fn is_due(&self, now: i64) -> bool {
        self.autopilot_enabled
            && self.connection_state.is_connected()
            && self.scheduling_status(now) == SchedulingStatus::Due
    }

    pub fn cadence_secs(&self) -> i64 {
        self.cadence_minutes.saturating_mul(60)
    }

    /// Dashboard view without credential material
    pub fn summary(&self, now: i64) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            description: self.description.clone(),
            autopilot_enabled: self.autopilot_enabled,
            cadence_minutes: self.cadence_minutes,
            next_run_at: self.next_run_at,
            last_posted_at: self.last_posted_at,
            connection_state: self.connection_state,
            last_error: self.last_error.clone(),
            status: self.scheduling_status(now),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStatus {
    /// No next run is set
    Idle,
    /// Next run lies in the future
    Scheduled,
    /// Next run has passed
    Due,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub id: String,
    pub username: String,
    pub description: String,
    pub autopilot_enabled: bool,
    pub cadence_minutes: i64,
    pub next_run_at: Option<i64>,
    pub last_posted_at: Option<i64>,
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
    pub status: SchedulingStatus,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulingCounts {
    pub due: i64,
    pub scheduled: i64,
    pub idle: i64,
}

// ============================================================================
// Content
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caption {
    pub id: String,
    pub text: String,
    pub used: bool,
    pub used_at: Option<i64>,
    pub created_at: i64,
}

impl Caption {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            used: false,
            used_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub url: String,
    pub use_count: i64,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

impl Image {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            use_count: 0,
            last_used_at: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Error,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Error => "error",
        }
    }
}

/// One row of the append-only posting log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostingHistory {
    pub id: Option<i64>,
    pub account_id: String,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
    pub method: PublishMethod,
    pub remote_post_id: Option<String>,
    pub caption_id: Option<String>,
    pub image_id: Option<String>,
    pub posted_at: Option<i64>,
    pub created_at: i64,
}

// ============================================================================
// Tick reports
// ============================================================================

/// What happened to one due account during a tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountOutcome {
    Posted,
    ContentExhausted,
    /// Another worker holds the account
    Locked,
    /// Re-read showed the account was disabled, disconnected or rescheduled
    NoLongerDue,
    CredentialFailed,
    PublishFailed,
    /// Tick deadline passed before the account was started
    Deferred,
    StoreError,
}

impl AccountOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AccountOutcome::PublishFailed | AccountOutcome::StoreError
        )
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            AccountOutcome::ContentExhausted
                | AccountOutcome::CredentialFailed
                | AccountOutcome::Locked
                | AccountOutcome::NoLongerDue
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountReport {
    pub account_id: String,
    pub outcome: AccountOutcome,
    pub detail: Option<String>,
    pub next_run_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: u64,
    /// posted + failed + skipped; deferred accounts are not attempted
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub accounts: Vec<AccountReport>,
}

impl TickReport {
    /// Build a report, deriving the counters from the per-account outcomes
    pub fn from_outcomes(
        started_at: i64,
        finished_at: i64,
        duration_ms: u64,
        accounts: Vec<AccountReport>,
    ) -> Self {
        let mut report = TickReport {
            started_at,
            finished_at,
            duration_ms,
            ..Default::default()
        };

        for entry in &accounts {
            match entry.outcome {
                AccountOutcome::Posted => report.succeeded += 1,
                AccountOutcome::Deferred => report.deferred += 1,
                outcome if outcome.is_failure() => report.failed += 1,
                _ => report.skipped += 1,
            }
        }
        report.attempted = report.succeeded + report.failed + report.skipped;
        report.accounts = accounts;
        report
    }
}
