//! Database operations for Autopost
//!
//! Every mutation of an account keeps `next_run_at` consistent with its
//! autopilot flag and connection state: a schedule exists only while
//! autopilot is enabled and the account is connected.

use secrecy::{ExposeSecret, SecretString};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::time::Duration;

use crate::error::{AutopostError, DbError, Result};
use crate::types::{
    Account, Caption, ConnectionState, HistoryStatus, Image, OAuthCredential, PostingHistory,
    SchedulingCounts, SessionCredential, MAX_CADENCE_MINUTES,
};

const ACCOUNT_COLUMNS: &str = "id, username, description, autopilot_enabled, cadence_minutes, \
     next_run_at, last_posted_at, connection_state, session_credential, oauth_access_token, \
     oauth_refresh_token, oauth_expires_at, last_error, created_at";

/// Clause reused by every update that may move `next_run_at`
const SCHEDULE_GUARD: &str = "autopilot_enabled = 1 AND connection_state != 'disconnected'";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction for a per-account commit
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await.map_err(DbError::SqlxError)?)
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Insert a new account. Schedule fields are normalized so a disabled or
    /// disconnected account never carries a `next_run_at`.
    pub async fn create_account(&self, account: &Account) -> Result<()> {
        check_cadence(account.cadence_minutes)?;

        let next_run_at = if account.autopilot_enabled && account.connection_state.is_connected()
        {
            account.next_run_at
        } else {
            None
        };

        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, username, description, autopilot_enabled, cadence_minutes,
                next_run_at, last_posted_at, connection_state, session_credential,
                oauth_access_token, oauth_refresh_token, oauth_expires_at,
                last_error, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.username)
        .bind(&account.description)
        .bind(account.autopilot_enabled)
        .bind(account.cadence_minutes)
        .bind(next_run_at)
        .bind(account.last_posted_at)
        .bind(account.connection_state.as_str())
        .bind(
            account
                .session_credential
                .as_ref()
                .map(|s| s.blob.expose_secret().to_string()),
        )
        .bind(
            account
                .oauth_credential
                .as_ref()
                .map(|o| o.access_token.expose_secret().to_string()),
        )
        .bind(
            account
                .oauth_credential
                .as_ref()
                .map(|o| o.refresh_token.expose_secret().to_string()),
        )
        .bind(account.oauth_credential.as_ref().map(|o| o.expires_at))
        .bind(&account.last_error)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM accounts ORDER BY created_at ASC, id ASC",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Accounts whose schedule has come due, earliest first
    pub async fn fetch_due_accounts(&self, now: i64, limit: usize) -> Result<Vec<Account>> {
        let query = format!(
            r#"
            SELECT {} FROM accounts
            WHERE autopilot_enabled = 1
              AND next_run_at IS NOT NULL
              AND next_run_at <= ?
            ORDER BY next_run_at ASC, id ASC
            LIMIT ?
            "#,
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Toggle autopilot and optionally change the cadence
    ///
    /// Enabling a connected account without a schedule makes it due at `now`.
    /// Disabling always clears the schedule.
    pub async fn set_autopilot(
        &self,
        id: &str,
        enabled: bool,
        cadence_minutes: Option<i64>,
        now: i64,
    ) -> Result<Account> {
        if let Some(cadence) = cadence_minutes {
            check_cadence(cadence)?;
        }

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET autopilot_enabled = ?,
                cadence_minutes = COALESCE(?, cadence_minutes),
                next_run_at = CASE
                    WHEN ? = 1 AND connection_state != 'disconnected'
                        THEN COALESCE(next_run_at, ?)
                    ELSE NULL
                END
            WHERE id = ?
            "#,
        )
        .bind(enabled)
        .bind(cadence_minutes)
        .bind(enabled)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(AutopostError::NotFound(format!("account {}", id)));
        }

        self.get_account(id)
            .await?
            .ok_or_else(|| AutopostError::NotFound(format!("account {}", id)))
    }

    /// Store a session blob and move the account to `connected_session`
    pub async fn connect_session(&self, id: &str, blob: &SecretString, now: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET connection_state = 'connected_session',
                session_credential = ?,
                oauth_access_token = NULL,
                oauth_refresh_token = NULL,
                oauth_expires_at = NULL,
                last_error = NULL,
                next_run_at = CASE
                    WHEN autopilot_enabled = 1 THEN COALESCE(next_run_at, ?)
                    ELSE NULL
                END
            WHERE id = ?
            "#,
        )
        .bind(blob.expose_secret())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    /// Store OAuth tokens and move the account to `connected_official`
    pub async fn connect_official(
        &self,
        id: &str,
        credential: &OAuthCredential,
        now: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET connection_state = 'connected_official',
                session_credential = NULL,
                oauth_access_token = ?,
                oauth_refresh_token = ?,
                oauth_expires_at = ?,
                last_error = NULL,
                next_run_at = CASE
                    WHEN autopilot_enabled = 1 THEN COALESCE(next_run_at, ?)
                    ELSE NULL
                END
            WHERE id = ?
            "#,
        )
        .bind(credential.access_token.expose_secret())
        .bind(credential.refresh_token.expose_secret())
        .bind(credential.expires_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    /// Drop credentials and the schedule; autopilot keeps its setting so a
    /// reconnect resumes posting
    pub async fn disconnect_account(&self, id: &str, reason: Option<&str>) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::SqlxError)?;
        if disconnect(&mut conn, id, reason).await? {
            Ok(())
        } else {
            Err(AutopostError::NotFound(format!("account {}", id)))
        }
    }

    /// Persist a refreshed access token; the refresh token only rotates when
    /// the provider issued a new one
    pub async fn update_oauth_tokens(
        &self,
        id: &str,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
        expires_at: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET oauth_access_token = ?,
                oauth_refresh_token = COALESCE(?, oauth_refresh_token),
                oauth_expires_at = ?
            WHERE id = ? AND connection_state = 'connected_official'
            "#,
        )
        .bind(access_token.expose_secret())
        .bind(refresh_token.map(|t| t.expose_secret().to_string()))
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    /// Move `next_run_at` for an account that is still eligible to run.
    /// Returns false when the account was disabled or disconnected meanwhile.
    pub async fn reschedule(&self, id: &str, next_run_at: i64) -> Result<bool> {
        let query = format!(
            "UPDATE accounts SET next_run_at = ? WHERE id = ? AND {}",
            SCHEDULE_GUARD
        );
        let result = sqlx::query(&query)
            .bind(next_run_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Stop scheduling an account without touching its autopilot flag
    pub async fn clear_schedule(&self, id: &str, reason: &str) -> Result<()> {
        sqlx::query("UPDATE accounts SET next_run_at = NULL, last_error = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn scheduling_counts(&self, now: i64) -> Result<SchedulingCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN next_run_at IS NOT NULL AND next_run_at <= ? THEN 1 ELSE 0 END), 0) AS due,
                COALESCE(SUM(CASE WHEN next_run_at > ? THEN 1 ELSE 0 END), 0) AS scheduled,
                COALESCE(SUM(CASE WHEN next_run_at IS NULL THEN 1 ELSE 0 END), 0) AS idle
            FROM accounts
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(SchedulingCounts {
            due: row.try_get("due").map_err(DbError::SqlxError)?,
            scheduled: row.try_get("scheduled").map_err(DbError::SqlxError)?,
            idle: row.try_get("idle").map_err(DbError::SqlxError)?,
        })
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    pub async fn add_caption(&self, caption: &Caption) -> Result<()> {
        if caption.text.trim().is_empty() {
            return Err(AutopostError::InvalidInput(
                "caption text cannot be empty".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO captions (id, text, used, used_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&caption.id)
        .bind(&caption.text)
        .bind(caption.used)
        .bind(caption.used_at)
        .bind(caption.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_caption(&self, id: &str) -> Result<Option<Caption>> {
        let row = sqlx::query("SELECT id, text, used, used_at, created_at FROM captions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(caption_from_row).transpose()
    }

    /// Oldest unused caption (ties broken by id)
    pub async fn next_unused_caption(&self) -> Result<Option<Caption>> {
        Ok(self.unused_captions(1).await?.into_iter().next())
    }

    /// Up to `limit` unused captions, oldest first
    pub async fn unused_captions(&self, limit: usize) -> Result<Vec<Caption>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, used, used_at, created_at
            FROM captions
            WHERE used = 0
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(caption_from_row).collect()
    }

    /// Mark every caption unused again; returns how many were flipped
    pub async fn reset_captions(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE captions SET used = 0, used_at = NULL WHERE used = 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn count_unused_captions(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM captions WHERE used = 0")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    pub async fn add_image(&self, image: &Image) -> Result<()> {
        if image.url.trim().is_empty() {
            return Err(AutopostError::InvalidInput(
                "image url cannot be empty".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO images (id, url, use_count, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.id)
        .bind(&image.url)
        .bind(image.use_count)
        .bind(image.last_used_at)
        .bind(image.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_image(&self, id: &str) -> Result<Option<Image>> {
        let row = sqlx::query(
            "SELECT id, url, use_count, last_used_at, created_at FROM images WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(image_from_row).transpose()
    }

    /// Least recently used image; never-used images come first
    pub async fn least_used_image(&self) -> Result<Option<Image>> {
        let row = sqlx::query(
            r#"
            SELECT id, url, use_count, last_used_at, created_at
            FROM images
            ORDER BY last_used_at IS NOT NULL, last_used_at ASC, use_count ASC, created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(image_from_row).transpose()
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Posting history, newest first
    pub async fn list_history(
        &self,
        account_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<PostingHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, status, error_message, method, remote_post_id,
                   caption_id, image_id, posted_at, created_at
            FROM posting_history
            WHERE (? IS NULL OR account_id = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(history_from_row).collect()
    }
}

fn check_cadence(cadence_minutes: i64) -> Result<()> {
    if !(1..=MAX_CADENCE_MINUTES).contains(&cadence_minutes) {
        return Err(AutopostError::InvalidInput(format!(
            "cadence_minutes must be between 1 and {}, got {}",
            MAX_CADENCE_MINUTES, cadence_minutes
        )));
    }
    Ok(())
}

fn not_found_if_untouched(rows_affected: u64, id: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(AutopostError::NotFound(format!("account {}", id)));
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Transaction-scoped writes used by the scheduler's per-account commit
// ----------------------------------------------------------------------

/// Disconnect an account on the caller's connection; returns false when no
/// such account exists
pub async fn disconnect(conn: &mut SqliteConnection, id: &str, reason: Option<&str>) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET connection_state = 'disconnected',
            session_credential = NULL,
            oauth_access_token = NULL,
            oauth_refresh_token = NULL,
            oauth_expires_at = NULL,
            next_run_at = NULL,
            last_error = COALESCE(?, last_error)
        WHERE id = ?
        "#,
    )
    .bind(reason)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(result.rows_affected() > 0)
}

pub async fn append_history(conn: &mut SqliteConnection, entry: &PostingHistory) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO posting_history (
            account_id, status, error_message, method, remote_post_id,
            caption_id, image_id, posted_at, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.account_id)
    .bind(entry.status.as_str())
    .bind(&entry.error_message)
    .bind(entry.method.as_str())
    .bind(&entry.remote_post_id)
    .bind(&entry.caption_id)
    .bind(&entry.image_id)
    .bind(entry.posted_at)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(result.last_insert_rowid())
}

/// Returns false when the caption had already been consumed
pub async fn mark_caption_used(conn: &mut SqliteConnection, caption_id: &str, now: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE captions SET used = 1, used_at = ? WHERE id = ? AND used = 0")
        .bind(now)
        .bind(caption_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_image_used(conn: &mut SqliteConnection, image_id: &str, now: i64) -> Result<()> {
    sqlx::query("UPDATE images SET use_count = use_count + 1, last_used_at = ? WHERE id = ?")
        .bind(now)
        .bind(image_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

/// Record a confirmed post. The new schedule only applies while the account
/// is still enabled and connected.
pub async fn record_post_success(
    conn: &mut SqliteConnection,
    account_id: &str,
    now: i64,
    next_run_at: i64,
) -> Result<()> {
    let query = format!(
        r#"
        UPDATE accounts
        SET last_posted_at = ?,
            last_error = NULL,
            next_run_at = CASE WHEN {} THEN ? ELSE NULL END
        WHERE id = ?
        "#,
        SCHEDULE_GUARD
    );
    sqlx::query(&query)
        .bind(now)
        .bind(next_run_at)
        .bind(account_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

/// Record a failed publish; `last_posted_at` is left alone
pub async fn record_post_failure(
    conn: &mut SqliteConnection,
    account_id: &str,
    next_run_at: i64,
    error: &str,
) -> Result<()> {
    let query = format!(
        r#"
        UPDATE accounts
        SET last_error = ?,
            next_run_at = CASE WHEN {} THEN ? ELSE NULL END
        WHERE id = ?
        "#,
        SCHEDULE_GUARD
    );
    sqlx::query(&query)
        .bind(error)
        .bind(next_run_at)
        .bind(account_id)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(())
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    let state: String = row.try_get("connection_state").map_err(DbError::SqlxError)?;
    let connection_state: ConnectionState =
        state.parse().map_err(|reason| DbError::CorruptRow {
            table: "accounts",
            reason,
        })?;

    let session_blob: Option<String> = row.try_get("session_credential").map_err(DbError::SqlxError)?;
    let access_token: Option<String> = row.try_get("oauth_access_token").map_err(DbError::SqlxError)?;
    let refresh_token: Option<String> =
        row.try_get("oauth_refresh_token").map_err(DbError::SqlxError)?;
    let expires_at: Option<i64> = row.try_get("oauth_expires_at").map_err(DbError::SqlxError)?;

    let oauth_credential = match (access_token, refresh_token, expires_at) {
        (Some(access), Some(refresh), Some(expires_at)) => Some(OAuthCredential {
            access_token: SecretString::from(access),
            refresh_token: SecretString::from(refresh),
            expires_at,
        }),
        _ => None,
    };

    Ok(Account {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        username: row.try_get("username").map_err(DbError::SqlxError)?,
        description: row.try_get("description").map_err(DbError::SqlxError)?,
        autopilot_enabled: row.try_get("autopilot_enabled").map_err(DbError::SqlxError)?,
        cadence_minutes: row.try_get("cadence_minutes").map_err(DbError::SqlxError)?,
        next_run_at: row.try_get("next_run_at").map_err(DbError::SqlxError)?,
        last_posted_at: row.try_get("last_posted_at").map_err(DbError::SqlxError)?,
        connection_state,
        session_credential: session_blob.map(|blob| SessionCredential {
            blob: SecretString::from(blob),
        }),
        oauth_credential,
        last_error: row.try_get("last_error").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
    })
}

fn caption_from_row(row: &SqliteRow) -> Result<Caption> {
    Ok(Caption {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        text: row.try_get("text").map_err(DbError::SqlxError)?,
        used: row.try_get("used").map_err(DbError::SqlxError)?,
        used_at: row.try_get("used_at").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
    })
}

fn image_from_row(row: &SqliteRow) -> Result<Image> {
    Ok(Image {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        url: row.try_get("url").map_err(DbError::SqlxError)?,
        use_count: row.try_get("use_count").map_err(DbError::SqlxError)?,
        last_used_at: row.try_get("last_used_at").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<PostingHistory> {
    let status = match row.try_get::<String, _>("status").map_err(DbError::SqlxError)?.as_str() {
        "success" => HistoryStatus::Success,
        "error" => HistoryStatus::Error,
        other => {
            return Err(DbError::CorruptRow {
                table: "posting_history",
                reason: format!("unknown status '{}'", other),
            }
            .into())
        }
    };
    let method: String = row.try_get("method").map_err(DbError::SqlxError)?;
    let method = method.parse().map_err(|reason| DbError::CorruptRow {
        table: "posting_history",
        reason,
    })?;

    Ok(PostingHistory {
        id: row.try_get("id").map_err(DbError::SqlxError)?,
        account_id: row.try_get("account_id").map_err(DbError::SqlxError)?,
        status,
        error_message: row.try_get("error_message").map_err(DbError::SqlxError)?,
        method,
        remote_post_id: row.try_get("remote_post_id").map_err(DbError::SqlxError)?,
        caption_id: row.try_get("caption_id").map_err(DbError::SqlxError)?,
        image_id: row.try_get("image_id").map_err(DbError::SqlxError)?,
        posted_at: row.try_get("posted_at").map_err(DbError::SqlxError)?,
        created_at: row.try_get("created_at").map_err(DbError::SqlxError)?,
    })
}
