//! Service facade wiring the store, credentials, backends, and scheduler
//!
//! `AutopilotService` is the single entry point the trigger surfaces use:
//! the one-shot CLI run, the timer loop, and the HTTP routes all go through
//! it so they share one scheduler (and so one advisory lock map).
//!
//! # Example
//!
//! ```no_run
//! use libautopost::{AutopilotService, Config};
//!
//! # async fn example() -> libautopost::Result<()> {
//! let service = AutopilotService::from_config(Config::load()?).await?;
//! let report = service.run_tick(chrono::Utc::now().timestamp()).await?;
//! println!("{} posted, {} failed", report.succeeded, report.failed);
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::sync::Arc;

use crate::credentials::CredentialResolver;
use crate::error::ConfigError;
use crate::oauth::{DisabledRefresher, HttpTokenRefresher, TokenRefresher};
use crate::platforms::official::OfficialApiClient;
use crate::platforms::session::SessionClient;
use crate::platforms::PostingBackend;
use crate::publisher::Publisher;
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::types::{AccountSummary, PostingHistory, SchedulingCounts, TickReport};
use crate::{Config, Database, Result};

/// Payload of the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub counts: SchedulingCounts,
    pub recent_ticks: Vec<TickReport>,
}

pub struct AutopilotService {
    db: Database,
    config: Arc<Config>,
    scheduler: Arc<Scheduler>,
}

impl AutopilotService {
    /// Load configuration from the default location and build the service
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Build the service with HTTP backends and the configured refresher
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let db = Database::new(&config.database.path).await?;

        let client = reqwest::Client::builder()
            .timeout(config.credentials.network_timeout())
            .user_agent(concat!("autopost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http client".to_string(),
                reason: e.to_string(),
            })?;

        let refresher: Arc<dyn TokenRefresher> = match &config.oauth {
            Some(oauth) => Arc::new(HttpTokenRefresher::new(client.clone(), oauth.clone())),
            None => {
                tracing::debug!("No [oauth] table configured, token refresh disabled");
                Arc::new(DisabledRefresher)
            }
        };
        let session: Arc<dyn PostingBackend> =
            Arc::new(SessionClient::new(client.clone(), config.session.base_url.clone()));
        let official: Arc<dyn PostingBackend> =
            Arc::new(OfficialApiClient::new(client, config.official.base_url.clone()));

        Ok(Self::with_parts(db, config, refresher, session, official))
    }

    /// Assemble the service from explicit collaborators (used by tests)
    pub fn with_parts(
        db: Database,
        config: Config,
        refresher: Arc<dyn TokenRefresher>,
        session: Arc<dyn PostingBackend>,
        official: Arc<dyn PostingBackend>,
    ) -> Self {
        let timeout = config.credentials.network_timeout();
        let resolver = CredentialResolver::new(
            db.clone(),
            refresher,
            config.credentials.refresh_margin_secs,
            timeout,
        );
        let publisher = Publisher::new(session, official, timeout);
        let scheduler = Scheduler::new(
            db.clone(),
            resolver,
            publisher,
            RetryPolicy::from_config(&config.retry),
            SchedulerSettings::from_config(&config.scheduler),
        );

        Self {
            db,
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn run_tick(&self, now: i64) -> Result<TickReport> {
        self.scheduler.tick(now).await
    }

    pub async fn status(&self, now: i64) -> Result<SchedulerStatus> {
        Ok(SchedulerStatus {
            counts: self.db.scheduling_counts(now).await?,
            recent_ticks: self.scheduler.recent_reports(),
        })
    }

    /// Dashboard view of every account
    pub async fn accounts(&self, now: i64) -> Result<Vec<AccountSummary>> {
        Ok(self
            .db
            .list_accounts()
            .await?
            .iter()
            .map(|account| account.summary(now))
            .collect())
    }

    pub async fn history(&self, account_id: Option<&str>, limit: usize) -> Result<Vec<PostingHistory>> {
        self.db.list_history(account_id, limit).await
    }
}
