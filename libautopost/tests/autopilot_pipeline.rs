//! End-to-end autopilot tick tests
//!
//! Each test builds a real SQLite store in a temp directory and drives the
//! scheduler through `AutopilotService` with mock backends and a mock token
//! refresher.

use anyhow::Result;
use libautopost::config::Config;
use libautopost::db::Database;
use libautopost::error::{CredentialError, PublishError};
use libautopost::oauth::{MockRefresher, TokenGrant};
use libautopost::platforms::mock::MockBackend;
use libautopost::types::{
    Account, AccountOutcome, Caption, ConnectionState, HistoryStatus, Image, OAuthCredential,
    PublishMethod,
};
use libautopost::AutopilotService;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000;

struct TestEnv {
    service: AutopilotService,
    session: MockBackend,
    official: MockBackend,
    refresher: MockRefresher,
    _temp: TempDir,
}

impl TestEnv {
    fn db(&self) -> &Database {
        self.service.db()
    }
}

async fn env_with(session: MockBackend, official: MockBackend, refresher: MockRefresher) -> Result<TestEnv> {
    let temp = TempDir::new()?;
    let mut config = Config::default_config();
    config.database.path = temp.path().join("autopost.db").to_string_lossy().to_string();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;

    let db = Database::new(&config.database.path).await?;
    let service = AutopilotService::with_parts(
        db,
        config,
        Arc::new(refresher.clone()),
        Arc::new(session.clone()),
        Arc::new(official.clone()),
    );

    Ok(TestEnv {
        service,
        session,
        official,
        refresher,
        _temp: temp,
    })
}

async fn env() -> Result<TestEnv> {
    env_with(
        MockBackend::new("session"),
        MockBackend::new("official"),
        MockRefresher::new(),
    )
    .await
}

/// A connected session account with autopilot on, due at `NOW`
async fn session_account(db: &Database, cadence: i64) -> Result<Account> {
    let account = Account::new("session-user", cadence);
    db.create_account(&account).await?;
    db.connect_session(&account.id, &SecretString::from("sessionid=xyz".to_string()), NOW)
        .await?;
    Ok(db.set_autopilot(&account.id, true, None, NOW).await?)
}

async fn official_account(db: &Database, cadence: i64, expires_at: i64) -> Result<Account> {
    let account = Account::new("official-user", cadence);
    db.create_account(&account).await?;
    db.connect_official(
        &account.id,
        &OAuthCredential {
            access_token: SecretString::from("access-old".to_string()),
            refresh_token: SecretString::from("refresh-old".to_string()),
            expires_at,
        },
        NOW,
    )
    .await?;
    Ok(db.set_autopilot(&account.id, true, None, NOW).await?)
}

async fn caption(db: &Database, text: &str, created_at: i64) -> Result<Caption> {
    let mut caption = Caption::new(text);
    caption.created_at = created_at;
    db.add_caption(&caption).await?;
    Ok(caption)
}

#[tokio::test]
async fn test_successful_post_consumes_content_and_reschedules() -> Result<()> {
    let env = env().await?;
    let account = session_account(env.db(), 60).await?;
    let first = caption(env.db(), "first caption", 10).await?;
    let second = caption(env.db(), "second caption", 20).await?;
    let image = Image::new("https://cdn.example.com/1.jpg");
    env.db().add_image(&image).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.accounts[0].outcome, AccountOutcome::Posted);

    // Exactly one caption consumed, the oldest
    let first = env.db().get_caption(&first.id).await?.unwrap();
    let second = env.db().get_caption(&second.id).await?.unwrap();
    assert!(first.used);
    assert_eq!(first.used_at, Some(NOW));
    assert!(!second.used);

    // Image bumped by exactly one
    let image = env.db().get_image(&image.id).await?.unwrap();
    assert_eq!(image.use_count, 1);
    assert_eq!(image.last_used_at, Some(NOW));

    // Next run inside the cadence + jitter window
    let stored = env.db().get_account(&account.id).await?.unwrap();
    let next = stored.next_run_at.unwrap();
    assert!(next >= NOW + 60 * 60);
    assert!(next < NOW + 60 * 60 + 2 * 60);
    assert_eq!(stored.last_posted_at, Some(NOW));
    assert!(stored.last_error.is_none());

    let history = env.db().list_history(Some(&account.id), 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Success);
    assert_eq!(history[0].method, PublishMethod::Session);
    assert_eq!(history[0].caption_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(history[0].image_id.as_deref(), Some(image.id.as_str()));
    assert!(history[0].remote_post_id.is_some());

    let calls = env.session.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text, "first caption");
    assert_eq!(calls[0].image_url.as_deref(), Some("https://cdn.example.com/1.jpg"));
    Ok(())
}

#[tokio::test]
async fn test_exhausted_content_skips_and_retries_soon() -> Result<()> {
    let env = env().await?;
    let account = session_account(env.db(), 60).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.accounts[0].outcome, AccountOutcome::ContentExhausted);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);

    let stored = env.db().get_account(&account.id).await?.unwrap();
    assert_eq!(stored.next_run_at, Some(NOW + 10 * 60));
    assert_eq!(stored.last_posted_at, None);
    assert!(stored.autopilot_enabled);

    assert!(env.db().list_history(Some(&account.id), 10).await?.is_empty());
    assert_eq!(env.session.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_expiring_oauth_token_is_refreshed_before_publish() -> Result<()> {
    let refresher = MockRefresher::new();
    refresher.push_response(Ok(TokenGrant {
        access_token: SecretString::from("access-new".to_string()),
        refresh_token: Some(SecretString::from("refresh-new".to_string())),
        expires_at: NOW + 3_600,
    }));
    let env = env_with(MockBackend::new("session"), MockBackend::new("official"), refresher).await?;
    let account = official_account(env.db(), 30, NOW + 60).await?;
    caption(env.db(), "official post", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.accounts[0].outcome, AccountOutcome::Posted);
    assert_eq!(env.refresher.call_count(), 1);
    assert_eq!(env.official.call_count(), 1);
    assert_eq!(env.session.call_count(), 0);

    let stored = env.db().get_account(&account.id).await?.unwrap();
    let oauth = stored.oauth_credential.unwrap();
    assert_eq!(oauth.access_token.expose_secret(), "access-new");
    assert_eq!(oauth.refresh_token.expose_secret(), "refresh-new");
    assert_eq!(oauth.expires_at, NOW + 3_600);

    let history = env.db().list_history(Some(&account.id), 10).await?;
    assert_eq!(history[0].method, PublishMethod::Official);
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_until_attempts_run_out() -> Result<()> {
    let session = MockBackend::failing("session", PublishError::rate_limited("429", None), 3);
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    let account = session_account(env.db(), 45).await?;
    let queued = caption(env.db(), "never posted", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.accounts[0].outcome, AccountOutcome::PublishFailed);
    assert_eq!(report.failed, 1);
    assert_eq!(env.session.call_count(), 3);

    // Every retry of the slot carries the same dedup hint
    let keys: Vec<_> = env.session.calls().into_iter().map(|c| c.idempotency_key).collect();
    assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));

    let history = env.db().list_history(Some(&account.id), 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Error);
    assert!(history[0].error_message.as_deref().unwrap().contains("rate limited"));

    let stored = env.db().get_account(&account.id).await?.unwrap();
    assert_eq!(stored.next_run_at, Some(NOW + 45 * 60));
    assert_eq!(stored.last_posted_at, None);
    assert!(stored.last_error.is_some());

    let queued = env.db().get_caption(&queued.id).await?.unwrap();
    assert!(!queued.used);
    Ok(())
}

#[tokio::test]
async fn test_transient_error_recovers_on_retry() -> Result<()> {
    let session = MockBackend::failing("session", PublishError::transient("connection reset"), 1);
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    session_account(env.db(), 60).await?;
    caption(env.db(), "eventually", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(env.session.call_count(), 2);
    assert_eq!(env.db().list_history(None, 10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_auth_expired_disconnects_account() -> Result<()> {
    let session = MockBackend::failing("session", PublishError::auth_expired("HTTP 401"), 1);
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    let account = session_account(env.db(), 60).await?;
    caption(env.db(), "rejected login", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.accounts[0].outcome, AccountOutcome::PublishFailed);
    assert_eq!(report.accounts[0].next_run_at, None);
    assert_eq!(env.session.call_count(), 1);

    let stored = env.db().get_account(&account.id).await?.unwrap();
    assert_eq!(stored.connection_state, ConnectionState::Disconnected);
    assert!(stored.session_credential.is_none());
    assert_eq!(stored.next_run_at, None);
    assert!(stored.autopilot_enabled);
    assert!(stored.last_error.unwrap().contains("credential expired"));

    let history = env.db().list_history(Some(&account.id), 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Error);
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_pauses_autopilot_without_history() -> Result<()> {
    let refresher = MockRefresher::new();
    refresher.push_response(Err(CredentialError::RefreshFailed("invalid_grant".to_string())));
    let env = env_with(MockBackend::new("session"), MockBackend::new("official"), refresher).await?;
    let account = official_account(env.db(), 60, NOW - 1).await?;
    let queued = caption(env.db(), "waiting", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.accounts[0].outcome, AccountOutcome::CredentialFailed);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(env.official.call_count(), 0);

    let stored = env.db().get_account(&account.id).await?.unwrap();
    assert!(stored.autopilot_enabled);
    assert_eq!(stored.next_run_at, None);
    assert_eq!(stored.connection_state, ConnectionState::Disconnected);
    assert!(stored.last_error.unwrap().contains("invalid_grant"));

    assert!(env.db().list_history(Some(&account.id), 10).await?.is_empty());
    assert!(!env.db().get_caption(&queued.id).await?.unwrap().used);
    Ok(())
}

#[tokio::test]
async fn test_disabled_accounts_are_never_touched() -> Result<()> {
    let env = env().await?;
    let enabled = session_account(env.db(), 60).await?;

    let disabled = session_account(env.db(), 60).await?;
    env.db().set_autopilot(&disabled.id, false, None, NOW).await?;
    let before = env.db().get_account(&disabled.id).await?.unwrap();

    caption(env.db(), "one", 1).await?;
    caption(env.db(), "two", 2).await?;

    let report = env.service.run_tick(NOW).await?;
    assert_eq!(report.accounts.len(), 1);
    assert_eq!(report.accounts[0].account_id, enabled.id);

    let after = env.db().get_account(&disabled.id).await?.unwrap();
    assert_eq!(after.autopilot_enabled, before.autopilot_enabled);
    assert_eq!(after.next_run_at, before.next_run_at);
    assert_eq!(after.last_posted_at, before.last_posted_at);
    assert_eq!(after.last_error, before.last_error);
    assert_eq!(after.connection_state, before.connection_state);
    assert!(env.db().list_history(Some(&disabled.id), 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_replaying_a_tick_does_not_double_post() -> Result<()> {
    let env = env().await?;
    let account = session_account(env.db(), 60).await?;
    caption(env.db(), "one", 1).await?;
    caption(env.db(), "two", 2).await?;

    env.service.run_tick(NOW).await?;
    let replay = env.service.run_tick(NOW).await?;

    assert_eq!(replay.attempted, 0);
    assert_eq!(env.session.call_count(), 1);
    assert_eq!(env.db().list_history(Some(&account.id), 10).await?.len(), 1);
    assert_eq!(env.db().count_unused_captions().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_ticks_post_once() -> Result<()> {
    let session = MockBackend::new("session").with_delay(Duration::from_millis(100));
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    let account = session_account(env.db(), 60).await?;
    caption(env.db(), "one", 1).await?;
    caption(env.db(), "two", 2).await?;

    let (first, second) = tokio::join!(env.service.run_tick(NOW), env.service.run_tick(NOW));
    let (first, second) = (first?, second?);

    assert_eq!(first.succeeded + second.succeeded, 1);
    assert_eq!(env.session.call_count(), 1);
    assert_eq!(env.db().list_history(Some(&account.id), 10).await?.len(), 1);
    assert!(env.service.scheduler().locks().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_one_failing_account_does_not_abort_the_tick() -> Result<()> {
    let session = MockBackend::new("session");
    session.push_result(Err(PublishError::rejected("caption violates policy")));
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;

    session_account(env.db(), 60).await?;
    session_account(env.db(), 60).await?;
    session_account(env.db(), 60).await?;
    for i in 0..3 {
        caption(env.db(), &format!("caption {}", i), i).await?;
    }

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 2);

    // The rejected post hands its caption back; each success consumed its own
    assert_eq!(env.db().count_unused_captions().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_status_reports_counts_and_recent_ticks() -> Result<()> {
    let env = env().await?;
    session_account(env.db(), 60).await?;
    let idle = Account::new("idle", 60);
    env.db().create_account(&idle).await?;
    caption(env.db(), "one", 1).await?;

    env.service.run_tick(NOW).await?;
    let status = env.service.status(NOW).await?;

    assert_eq!(status.counts.due, 0);
    assert_eq!(status.counts.scheduled, 1);
    assert_eq!(status.counts.idle, 1);
    assert_eq!(status.recent_ticks.len(), 1);
    assert_eq!(status.recent_ticks[0].succeeded, 1);
    Ok(())
}

#[tokio::test]
async fn test_ten_minute_cadence_account_overdue_by_a_minute() -> Result<()> {
    let env = env().await?;
    let account = Account::new("cadence-ten", 10);
    env.db().create_account(&account).await?;
    env.db()
        .connect_session(&account.id, &SecretString::from("sid".to_string()), NOW)
        .await?;
    env.db().set_autopilot(&account.id, true, None, NOW - 60).await?;
    let hello = caption(env.db(), "Hello", 1).await?;
    let image = Image::new("https://cdn.example.com/only.jpg");
    env.db().add_image(&image).await?;

    env.service.run_tick(NOW).await?;

    let history = env.db().list_history(Some(&account.id), 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Success);
    assert!(env.db().get_caption(&hello.id).await?.unwrap().used);
    assert_eq!(env.db().get_image(&image.id).await?.unwrap().use_count, 1);

    let next = env.db().get_account(&account.id).await?.unwrap().next_run_at.unwrap();
    assert!(next >= NOW + 10 * 60);
    assert!(next <= NOW + 12 * 60);
    Ok(())
}

#[tokio::test]
async fn test_parallel_accounts_post_distinct_captions() -> Result<()> {
    let session = MockBackend::new("session").with_delay(Duration::from_millis(20));
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    assert!(env.service.config().scheduler.concurrency > 1);

    let mut accounts = Vec::new();
    for _ in 0..3 {
        accounts.push(session_account(env.db(), 60).await?);
    }
    for i in 0..3 {
        caption(env.db(), &format!("caption {}", i), i).await?;
    }

    let report = env.service.run_tick(NOW).await?;
    assert_eq!(report.succeeded, 3);

    let mut texts: Vec<String> = env.session.calls().into_iter().map(|c| c.text).collect();
    texts.sort();
    assert_eq!(texts, vec!["caption 0", "caption 1", "caption 2"]);
    assert_eq!(env.db().count_unused_captions().await?, 0);
    assert_eq!(env.service.scheduler().rotator().claimed(), 0);

    // Each history row points at a different caption
    let mut caption_ids = Vec::new();
    for account in &accounts {
        let history = env.db().list_history(Some(&account.id), 10).await?;
        assert_eq!(history.len(), 1);
        caption_ids.push(history[0].caption_id.clone());
    }
    caption_ids.sort();
    caption_ids.dedup();
    assert_eq!(caption_ids.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_more_accounts_than_captions_skips_the_rest() -> Result<()> {
    let session = MockBackend::new("session").with_delay(Duration::from_millis(20));
    let env = env_with(session, MockBackend::new("official"), MockRefresher::new()).await?;
    for _ in 0..3 {
        session_account(env.db(), 60).await?;
    }
    caption(env.db(), "only one", 1).await?;

    let report = env.service.run_tick(NOW).await?;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(env.session.call_count(), 1);
    let exhausted = report
        .accounts
        .iter()
        .filter(|a| a.outcome == AccountOutcome::ContentExhausted)
        .count();
    assert_eq!(exhausted, 2);
    Ok(())
}
