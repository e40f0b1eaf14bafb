//! Configuration management for Autopost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub credentials: CredentialsConfig,
    pub oauth: Option<OAuthConfig>,
    pub session: BackendConfig,
    pub official: BackendConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/autopost/autopost.db".to_string(),
        }
    }
}

/// Tick behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Accounts published concurrently within one tick
    pub concurrency: usize,
    /// Upper bound on due accounts picked up per tick
    pub max_accounts_per_tick: usize,
    /// No new account is started once this much time has passed in a tick
    pub tick_deadline_secs: u64,
    /// Reschedule delay when the caption pool is empty
    pub skip_retry_minutes: i64,
    /// Upper bound (exclusive) of the random delay added after a post
    pub max_jitter_minutes: i64,
    /// Age after which an advisory lock is considered abandoned
    pub lock_ttl_secs: u64,
    /// Number of tick reports kept for the status endpoint
    pub history_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_accounts_per_tick: 50,
            tick_deadline_secs: 240,
            skip_retry_minutes: 10,
            max_jitter_minutes: 2,
            lock_ttl_secs: 600,
            history_size: 20,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_deadline(&self) -> Duration {
        Duration::from_secs(self.tick_deadline_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            factor: 2.0,
            max_delay_ms: 60_000,
            max_attempts: 3,
            jitter_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// OAuth tokens expiring within this window are refreshed before use
    pub refresh_margin_secs: i64,
    /// Timeout applied to every refresh and publish call
    pub network_timeout_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 300,
            network_timeout_secs: 10,
        }
    }
}

impl CredentialsConfig {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Base URL of a posting backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the default configuration; a file that exists
    /// but cannot be read or parsed is an error.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values the scheduler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.scheduler.concurrency == 0 {
            return Err(invalid("scheduler.concurrency", "must be at least 1"));
        }
        if self.scheduler.max_accounts_per_tick == 0 {
            return Err(invalid("scheduler.max_accounts_per_tick", "must be at least 1"));
        }
        if self.scheduler.skip_retry_minutes <= 0 {
            return Err(invalid("scheduler.skip_retry_minutes", "must be positive"));
        }
        if self.scheduler.max_jitter_minutes < 0 {
            return Err(invalid("scheduler.max_jitter_minutes", "must not be negative"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.factor < 1.0 {
            return Err(invalid("retry.factor", "must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.retry.jitter_ratio) {
            return Err(invalid("retry.jitter_ratio", "must be in [0.0, 1.0)"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(invalid("retry.max_delay_ms", "must be >= retry.base_delay_ms"));
        }
        if self.credentials.refresh_margin_secs < 0 {
            return Err(invalid("credentials.refresh_margin_secs", "must not be negative"));
        }
        if self.credentials.network_timeout_secs == 0 {
            return Err(invalid("credentials.network_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::AutopostError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AUTOPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("autopost").join("config.toml"))
}
