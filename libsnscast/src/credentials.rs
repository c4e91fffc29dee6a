//! Access tokens for linked social accounts
//!
//! [`CredentialStore::get_valid_token`] hands out a token that is good for at
//! least the configured safety margin, refreshing it through the adapter's
//! [`TokenRefresher`](crate::platforms::TokenRefresher) when needed. Refresh is
//! serialized per account: concurrent callers wait for the first refresh and
//! then reuse its result instead of refreshing again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{CredentialError, Result};
use crate::platforms::AdapterRegistry;
use crate::service::events::{Event, Telemetry};
use crate::types::SocialAccount;

pub struct CredentialStore {
    db: Database,
    registry: AdapterRegistry,
    clock: Arc<dyn Clock>,
    /// Refresh when fewer than this many seconds remain
    margin: i64,
    refresh_timeout: Duration,
    telemetry: Telemetry,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(
        db: Database,
        registry: AdapterRegistry,
        clock: Arc<dyn Clock>,
        margin: i64,
        refresh_timeout: Duration,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            db,
            registry,
            clock,
            margin,
            refresh_timeout,
            telemetry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn needs_refresh(&self, account: &SocialAccount, now: i64) -> bool {
        match account.token_expires_at {
            Some(expires_at) => expires_at - now <= self.margin,
            None => false,
        }
    }

    fn account_lock(&self, account_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load(&self, account_id: &str) -> Result<SocialAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| CredentialError::AccountNotFound(account_id.to_string()).into())
    }

    /// A token valid for at least the safety margin.
    ///
    /// # Errors
    ///
    /// `CredentialError::Expired` when a refresh is due but the platform
    /// cannot refresh, no refresh token is stored, or the refresh fails.
    /// `CredentialError::AccountNotFound` for an unknown account.
    pub async fn get_valid_token(&self, account_id: &str) -> Result<String> {
        let account = self.load(account_id).await?;
        if !self.needs_refresh(&account, self.clock.now()) {
            return Ok(account.access_token);
        }

        let lock = self.account_lock(account_id);
        let _guard = lock.lock().await;

        // The previous holder may have refreshed already
        let account = self.load(account_id).await?;
        if !self.needs_refresh(&account, self.clock.now()) {
            tracing::debug!(account_id = %account_id, "reusing token refreshed by another worker");
            return Ok(account.access_token);
        }

        match self.refresh(&account).await {
            Ok(token) => Ok(token),
            Err(reason) => {
                tracing::warn!(
                    account_id = %account_id,
                    platform = %account.platform,
                    reason = %reason,
                    "token refresh failed; account needs to be re-linked"
                );
                self.telemetry.metrics.token_refresh(false);
                self.telemetry.events.emit(Event::CredentialAlert {
                    account_id: account_id.to_string(),
                    reason: reason.clone(),
                });
                Err(CredentialError::Expired {
                    account_id: account_id.to_string(),
                    reason,
                }
                .into())
            }
        }
    }

    /// Refresh and persist. The error string is the operator-facing reason.
    async fn refresh(&self, account: &SocialAccount) -> std::result::Result<String, String> {
        let adapter = self
            .registry
            .get(account.platform)
            .ok_or_else(|| format!("{} is not configured", account.platform))?;
        let refresher = adapter
            .token_refresher()
            .ok_or_else(|| format!("{} does not support token refresh", account.platform))?;

        tracing::info!(
            account_id = %account.id,
            platform = %account.platform,
            expires_at = ?account.token_expires_at,
            "refreshing access token"
        );

        let grant = tokio::time::timeout(
            self.refresh_timeout,
            refresher.refresh_access_token(&account.access_token, account.refresh_token.as_deref()),
        )
        .await
        .map_err(|_| "token refresh timed out".to_string())?
        .map_err(|e| e.to_string())?;

        let updated = self
            .db
            .update_account_tokens(&account.id, &grant, self.clock.now())
            .await
            .map_err(|e| format!("could not store refreshed token: {}", e))?;
        if !updated {
            return Err("account disappeared during refresh".to_string());
        }

        self.telemetry.metrics.token_refresh(true);
        self.telemetry.events.emit(Event::TokenRefreshed {
            account_id: account.id.clone(),
            platform: account.platform.to_string(),
            expires_at: grant.expires_at,
        });

        Ok(grant.access_token)
    }
}
