//! Autopost - autopilot scheduling and posting pipeline
//!
//! This library decides, for each connected account, whether it is due to
//! post, what content to post, how to publish it, and how to recover from
//! partial failure. Triggers (HTTP, timers, one-shot runs) live in the
//! `autopost-send` binary.

pub mod config;
pub mod content;
pub mod credentials;
pub mod db;
pub mod error;
pub mod locks;
pub mod logging;
pub mod oauth;
pub mod platforms;
pub mod publisher;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{AutopostError, Result};
pub use scheduler::Scheduler;
pub use service::AutopilotService;
pub use types::{
    Account, AccountOutcome, Caption, ConnectionState, Credential, Image, PostingHistory,
    PublishMethod, TickReport,
};
