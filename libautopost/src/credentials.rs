//! Credential resolution for scheduled posting
//!
//! Turns an account row into a credential the publisher can use. Session
//! blobs are returned as stored. OAuth access tokens close to expiry are
//! refreshed first; a failed refresh disconnects the account.

use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::{CredentialError, Result};
use crate::oauth::TokenRefresher;
use crate::types::{Account, ConnectionState, Credential, OAuthCredential};

#[derive(Clone)]
pub struct CredentialResolver {
    db: Database,
    refresher: Arc<dyn TokenRefresher>,
    refresh_margin_secs: i64,
    timeout: Duration,
}

impl CredentialResolver {
    pub fn new(
        db: Database,
        refresher: Arc<dyn TokenRefresher>,
        refresh_margin_secs: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            refresher,
            refresh_margin_secs,
            timeout,
        }
    }

    /// Produce a usable credential for `account` at time `now`
    ///
    /// Errors are `AutopostError::Credential` for connection problems and
    /// `AutopostError::Database` when persisting a refresh fails.
    pub async fn resolve(&self, account: &Account, now: i64) -> Result<Credential> {
        match account.connection_state {
            ConnectionState::Disconnected => Err(CredentialError::NotConnected.into()),
            ConnectionState::ConnectedSession => match &account.session_credential {
                Some(session) => Ok(Credential::Session(session.clone())),
                None => {
                    tracing::warn!(account_id = %account.id, "Session account has no stored credential");
                    Err(CredentialError::NotConnected.into())
                }
            },
            ConnectionState::ConnectedOfficial => match &account.oauth_credential {
                Some(oauth) if oauth.expires_at - now > self.refresh_margin_secs => {
                    Ok(Credential::OAuth(oauth.clone()))
                }
                Some(oauth) => self.refresh(account, oauth).await.map(Credential::OAuth),
                None => {
                    tracing::warn!(account_id = %account.id, "Official account has no stored tokens");
                    Err(CredentialError::NotConnected.into())
                }
            },
        }
    }

    async fn refresh(&self, account: &Account, current: &OAuthCredential) -> Result<OAuthCredential> {
        tracing::info!(
            account_id = %account.id,
            expires_at = current.expires_at,
            "Refreshing OAuth access token"
        );

        let outcome = tokio::time::timeout(self.timeout, self.refresher.refresh(&current.refresh_token)).await;
        let grant = match outcome {
            Ok(Ok(grant)) => grant,
            Ok(Err(CredentialError::RefreshFailed(reason))) => {
                return Err(self.fail_refresh(account, reason).await)
            }
            Ok(Err(e)) => return Err(self.fail_refresh(account, e.to_string()).await),
            Err(_) => {
                return Err(self
                    .fail_refresh(account, format!("timed out after {:?}", self.timeout))
                    .await)
            }
        };

        self.db
            .update_oauth_tokens(
                &account.id,
                &grant.access_token,
                grant.refresh_token.as_ref(),
                grant.expires_at,
            )
            .await?;

        Ok(OAuthCredential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: grant.expires_at,
        })
    }

    /// Disconnect the account and build the error to return
    async fn fail_refresh(&self, account: &Account, reason: String) -> crate::error::AutopostError {
        tracing::warn!(account_id = %account.id, reason = %reason, "OAuth refresh failed");

        let message = format!("token refresh failed: {}", reason);
        if let Err(e) = self.db.disconnect_account(&account.id, Some(&message)).await {
            return e;
        }
        CredentialError::RefreshFailed(reason).into()
    }
}
