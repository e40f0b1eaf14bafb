//! Autopilot scheduler
//!
//! One tick walks the accounts that are due, and for each one selects
//! content, resolves a credential, publishes with retries, and commits the
//! outcome in a single transaction. Failures are contained per account; only
//! a failure to list due accounts aborts the tick.

use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::content::{ContentRotator, ContentSelection};
use crate::credentials::CredentialResolver;
use crate::db::{self, Database};
use crate::error::{AutopostError, DbError, PublishError, PublishErrorKind, Result};
use crate::locks::AccountLocks;
use crate::publisher::{PublishResult, Publisher};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{
    Account, AccountOutcome, AccountReport, Credential, HistoryStatus, PostingHistory, TickReport,
};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub max_accounts_per_tick: usize,
    pub tick_deadline: Duration,
    pub skip_retry_secs: i64,
    pub max_jitter_secs: i64,
    pub lock_ttl: Duration,
    pub history_size: usize,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_accounts_per_tick: config.max_accounts_per_tick,
            tick_deadline: config.tick_deadline(),
            skip_retry_secs: config.skip_retry_minutes.saturating_mul(60),
            max_jitter_secs: config.max_jitter_minutes.saturating_mul(60),
            lock_ttl: config.lock_ttl(),
            history_size: config.history_size,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

pub struct Scheduler {
    db: Database,
    rotator: ContentRotator,
    resolver: CredentialResolver,
    publisher: Publisher,
    retry: RetryPolicy,
    locks: AccountLocks,
    settings: SchedulerSettings,
    reports: Mutex<VecDeque<TickReport>>,
}

impl Scheduler {
    pub fn new(
        db: Database,
        resolver: CredentialResolver,
        publisher: Publisher,
        retry: RetryPolicy,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            rotator: ContentRotator::new(db.clone()),
            locks: AccountLocks::new(settings.lock_ttl),
            reports: Mutex::new(VecDeque::with_capacity(settings.history_size)),
            db,
            resolver,
            publisher,
            retry,
            settings,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn rotator(&self) -> &ContentRotator {
        &self.rotator
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one pass over the accounts due at `now`
    pub async fn tick(&self, now: i64) -> Result<TickReport> {
        let started = Instant::now();
        let deadline = started + self.settings.tick_deadline;

        let due = self
            .db
            .fetch_due_accounts(now, self.settings.max_accounts_per_tick)
            .await?;

        if due.is_empty() {
            debug!("No accounts due");
        } else {
            info!(due = due.len(), "Starting autopilot tick");
        }

        let mut results: Vec<(usize, AccountReport)> = stream::iter(due.into_iter().enumerate())
            .map(|(index, account)| async move {
                (index, self.process_account(account, now, deadline).await)
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let elapsed = started.elapsed();
        let report = TickReport::from_outcomes(
            now,
            now + elapsed.as_secs() as i64,
            elapsed.as_millis() as u64,
            results.into_iter().map(|(_, report)| report).collect(),
        );

        if report.attempted > 0 || report.deferred > 0 {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                deferred = report.deferred,
                duration_ms = report.duration_ms,
                "Autopilot tick finished"
            );
        }

        self.remember(report.clone());
        Ok(report)
    }

    /// Most recent tick reports, newest first
    pub fn recent_reports(&self) -> Vec<TickReport> {
        self.reports
            .lock()
            .map(|reports| reports.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    fn remember(&self, report: TickReport) {
        if self.settings.history_size == 0 {
            return;
        }
        if let Ok(mut reports) = self.reports.lock() {
            while reports.len() >= self.settings.history_size {
                reports.pop_front();
            }
            reports.push_back(report);
        }
    }

    async fn process_account(&self, account: Account, now: i64, deadline: Instant) -> AccountReport {
        if Instant::now() >= deadline {
            debug!(account_id = %account.id, "Tick deadline reached, deferring account");
            return report(&account.id, AccountOutcome::Deferred, None, account.next_run_at);
        }

        let _guard = match self.locks.try_acquire(&account.id) {
            Some(guard) => guard,
            None => {
                debug!(account_id = %account.id, "Account is locked by another worker");
                return report(&account.id, AccountOutcome::Locked, None, account.next_run_at);
            }
        };

        // The row may have changed since the due query ran
        let current = match self.db.get_account(&account.id).await {
            Ok(Some(current)) if current.is_due(now) => current,
            Ok(current) => {
                debug!(account_id = %account.id, "Account no longer due");
                let next_run_at = current.and_then(|a| a.next_run_at);
                return report(&account.id, AccountOutcome::NoLongerDue, None, next_run_at);
            }
            Err(e) => return self.store_failure(&account.id, e),
        };

        match self.run_account(&current, now, deadline).await {
            Ok(report) => report,
            Err(e) => self.store_failure(&current.id, e),
        }
    }

    async fn run_account(&self, account: &Account, now: i64, deadline: Instant) -> Result<AccountReport> {
        let slot = account.next_run_at.unwrap_or(now);

        let selection = match self.rotator.select_content(&account.id).await {
            Ok(selection) => selection,
            Err(AutopostError::ContentExhausted(e)) => {
                let next_run_at = now.saturating_add(self.settings.skip_retry_secs);
                let rescheduled = self.db.reschedule(&account.id, next_run_at).await?;
                info!(account_id = %account.id, next_run_at, "No content available, retrying later");
                return Ok(report(
                    &account.id,
                    AccountOutcome::ContentExhausted,
                    Some(e.to_string()),
                    rescheduled.then_some(next_run_at),
                ));
            }
            Err(e) => return Err(e),
        };

        let credential = match self.resolver.resolve(account, now).await {
            Ok(credential) => credential,
            Err(AutopostError::Credential(e)) => {
                let message = e.to_string();
                self.db.clear_schedule(&account.id, &message).await?;
                warn!(account_id = %account.id, error = %message, "Credential unavailable, autopilot paused");
                return Ok(report(
                    &account.id,
                    AccountOutcome::CredentialFailed,
                    Some(message),
                    None,
                ));
            }
            Err(e) => return Err(e),
        };

        match self
            .publish_with_retry(account, &credential, &selection, slot, deadline)
            .await
        {
            Ok(result) => {
                let next_run_at = self.commit_success(account, &selection, &result, now).await?;
                info!(
                    account_id = %account.id,
                    method = result.method.as_str(),
                    remote_post_id = %result.remote_post_id,
                    next_run_at,
                    "Posted"
                );
                Ok(report(
                    &account.id,
                    AccountOutcome::Posted,
                    Some(result.remote_post_id),
                    Some(next_run_at),
                ))
            }
            Err(error) => {
                let next_run_at = self
                    .commit_failure(account, &credential, &selection, &error, now)
                    .await?;
                warn!(
                    account_id = %account.id,
                    kind = %error.kind,
                    error = %error.message,
                    "Publish failed"
                );
                Ok(report(
                    &account.id,
                    AccountOutcome::PublishFailed,
                    Some(error.to_string()),
                    next_run_at,
                ))
            }
        }
    }

    async fn publish_with_retry(
        &self,
        account: &Account,
        credential: &Credential,
        selection: &ContentSelection,
        slot: i64,
        deadline: Instant,
    ) -> std::result::Result<PublishResult, PublishError> {
        let mut attempt = 1;
        loop {
            let outcome = self
                .publisher
                .publish(
                    &account.id,
                    credential,
                    &selection.caption,
                    selection.image.as_ref(),
                    slot,
                )
                .await;

            let error = match outcome {
                Ok(result) => {
                    if attempt > 1 {
                        info!(account_id = %account.id, attempt, "Published after retry");
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            match self.retry.next_delay(attempt, &error.kind) {
                RetryDecision::Retry(delay) => {
                    if Instant::now() + delay > deadline {
                        warn!(
                            account_id = %account.id,
                            attempt,
                            "Backoff would pass the tick deadline, giving up"
                        );
                        return Err(error);
                    }
                    warn!(
                        account_id = %account.id,
                        attempt,
                        kind = %error.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Retryable publish error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }

    /// History row, content marks, and the new schedule in one transaction
    async fn commit_success(
        &self,
        account: &Account,
        selection: &ContentSelection,
        result: &PublishResult,
        now: i64,
    ) -> Result<i64> {
        let next_run_at = now
            .saturating_add(account.cadence_secs())
            .saturating_add(self.jitter_secs());

        let mut tx = self.db.begin().await?;
        db::append_history(
            &mut tx,
            &PostingHistory {
                id: None,
                account_id: account.id.clone(),
                status: HistoryStatus::Success,
                error_message: None,
                method: result.method,
                remote_post_id: Some(result.remote_post_id.clone()),
                caption_id: Some(selection.caption.id.clone()),
                image_id: selection.image.as_ref().map(|i| i.id.clone()),
                posted_at: Some(now),
                created_at: now,
            },
        )
        .await?;
        ContentRotator::mark_used(&mut tx, selection, now).await?;
        db::record_post_success(&mut tx, &account.id, now, next_run_at).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;

        Ok(next_run_at)
    }

    /// Error row and a full-cadence reschedule; an expired credential also
    /// disconnects the account in the same transaction. Returns the resulting
    /// `next_run_at`.
    async fn commit_failure(
        &self,
        account: &Account,
        credential: &Credential,
        selection: &ContentSelection,
        error: &PublishError,
        now: i64,
    ) -> Result<Option<i64>> {
        let next_run_at = now.saturating_add(account.cadence_secs());
        let message = error.to_string();
        let auth_expired = error.kind == PublishErrorKind::AuthExpired;

        let mut tx = self.db.begin().await?;
        db::append_history(
            &mut tx,
            &PostingHistory {
                id: None,
                account_id: account.id.clone(),
                status: HistoryStatus::Error,
                error_message: Some(message.clone()),
                method: credential.method(),
                remote_post_id: None,
                caption_id: Some(selection.caption.id.clone()),
                image_id: selection.image.as_ref().map(|i| i.id.clone()),
                posted_at: None,
                created_at: now,
            },
        )
        .await?;
        db::record_post_failure(&mut tx, &account.id, next_run_at, &message).await?;
        if auth_expired {
            let reason = format!("credential expired: {}", error.message);
            db::disconnect(&mut tx, &account.id, Some(&reason)).await?;
        }
        tx.commit().await.map_err(DbError::SqlxError)?;

        if auth_expired {
            warn!(account_id = %account.id, "Credential expired, account disconnected");
            return Ok(None);
        }

        Ok(Some(next_run_at))
    }

    fn jitter_secs(&self) -> i64 {
        if self.settings.max_jitter_secs > 0 {
            rand::thread_rng().gen_range(0..self.settings.max_jitter_secs)
        } else {
            0
        }
    }

    fn store_failure(&self, account_id: &str, e: AutopostError) -> AccountReport {
        error!(account_id = %account_id, error = %e, "Store failure while processing account");
        report(account_id, AccountOutcome::StoreError, Some(e.to_string()), None)
    }
}

fn report(
    account_id: &str,
    outcome: AccountOutcome,
    detail: Option<String>,
    next_run_at: Option<i64>,
) -> AccountReport {
    AccountReport {
        account_id: account_id.to_string(),
        outcome,
        detail,
        next_run_at,
    }
}
