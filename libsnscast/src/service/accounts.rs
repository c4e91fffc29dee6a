//! Linked social accounts
//!
//! Connection setup runs on top of the adapter contract: the operator is sent
//! to [`AccountService::begin_link`]'s URL, the platform redirects back with a
//! code, and [`AccountService::complete_link`] exchanges it, looks up the
//! profile and stores the account.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{Result, SnscastError};
use crate::platforms::{AdapterRegistry, PlatformAdapter};
use crate::types::{AuthorizationRequest, SocialAccount, SocialPlatform, TokenGrant};

/// OAuth redirect parameters handed back by the platform
#[derive(Debug, Clone)]
pub struct LinkCallback {
    pub platform: SocialPlatform,
    pub code: String,
    pub redirect_uri: String,
    /// PKCE verifier from [`AuthorizationRequest::code_verifier`]
    pub code_verifier: Option<String>,
}

/// Account entered by an operator with a token obtained elsewhere
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub platform: SocialPlatform,
    pub account_name: String,
    pub external_account_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
}

pub struct AccountService {
    db: Database,
    registry: AdapterRegistry,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(db: Database, registry: AdapterRegistry, clock: Arc<dyn Clock>) -> Self {
        Self { db, registry, clock }
    }

    fn adapter(&self, platform: SocialPlatform) -> Result<Arc<dyn PlatformAdapter>> {
        self.registry
            .get(platform)
            .ok_or_else(|| SnscastError::InvalidInput(format!("{} is not configured", platform)))
    }

    /// Authorization URL the operator visits to grant access.
    pub fn begin_link(
        &self,
        platform: SocialPlatform,
        redirect_uri: &str,
        state: &str,
    ) -> Result<AuthorizationRequest> {
        self.adapter(platform)?.auth_url(redirect_uri, state)
    }

    /// Exchange the callback code and store the linked account.
    ///
    /// # Errors
    ///
    /// Platform errors from the code exchange or the profile lookup; nothing
    /// is stored in that case.
    pub async fn complete_link(&self, callback: LinkCallback) -> Result<SocialAccount> {
        let adapter = self.adapter(callback.platform)?;

        let grant = adapter
            .handle_oauth_callback(
                &callback.code,
                &callback.redirect_uri,
                callback.code_verifier.as_deref(),
            )
            .await?;
        let info = adapter.get_account_info(&grant.access_token).await?;

        let account = self.account_from_grant(callback.platform, &info.name, Some(info.id), grant);
        self.db.create_account(&account).await?;

        tracing::info!(
            account_id = %account.id,
            platform = %account.platform,
            account_name = %account.account_name,
            "linked account"
        );
        Ok(account)
    }

    /// Store an account whose token was obtained outside the link flow.
    pub async fn add(&self, new: NewAccount) -> Result<SocialAccount> {
        if new.account_name.trim().is_empty() {
            return Err(SnscastError::InvalidInput("account name cannot be empty".to_string()));
        }
        if new.access_token.trim().is_empty() {
            return Err(SnscastError::InvalidInput("access token cannot be empty".to_string()));
        }

        let grant = TokenGrant {
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            expires_at: new.token_expires_at,
        };
        let account = self.account_from_grant(new.platform, &new.account_name, new.external_account_id, grant);
        self.db.create_account(&account).await?;

        tracing::info!(account_id = %account.id, platform = %account.platform, "added account");
        Ok(account)
    }

    fn account_from_grant(
        &self,
        platform: SocialPlatform,
        account_name: &str,
        external_account_id: Option<String>,
        grant: TokenGrant,
    ) -> SocialAccount {
        let now = self.clock.now();
        let mut account = SocialAccount::new(platform, account_name, &grant.access_token, now);
        account.external_account_id = external_account_id;
        account.refresh_token = grant.refresh_token;
        account.token_expires_at = grant.expires_at;
        account.last_synced_at = Some(now);
        account
    }

    pub async fn get(&self, account_id: &str) -> Result<SocialAccount> {
        self.db
            .get_account(account_id)
            .await?
            .ok_or_else(|| SnscastError::NotFound(format!("account {}", account_id)))
    }

    pub async fn list(&self, platform: Option<SocialPlatform>) -> Result<Vec<SocialAccount>> {
        self.db.list_accounts(platform).await
    }

    /// Re-enable an account for fan-out and dispatch.
    pub async fn activate(&self, account_id: &str) -> Result<()> {
        self.set_active(account_id, true).await
    }

    /// Exclude an account from fan-out; its queued rows fail as
    /// "account deactivated" when they come due.
    pub async fn deactivate(&self, account_id: &str) -> Result<()> {
        self.set_active(account_id, false).await
    }

    async fn set_active(&self, account_id: &str, active: bool) -> Result<()> {
        if !self.db.set_account_active(account_id, active, self.clock.now()).await? {
            return Err(SnscastError::NotFound(format!("account {}", account_id)));
        }
        tracing::info!(account_id = %account_id, active, "account status changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::platforms::mock::MockAdapter;
    use crate::types::AccountInfo;
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    async fn setup() -> (TempDir, AccountService) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db").to_string_lossy())
            .await
            .unwrap();
        let adapter = MockAdapter::new(SocialPlatform::Linkedin).with_account_info(AccountInfo {
            id: "urn:li:person:abc".to_string(),
            name: "Brand Page".to_string(),
            platform: SocialPlatform::Linkedin,
            avatar_url: None,
            profile_url: None,
        });
        let registry = AdapterRegistry::new().with(Arc::new(adapter));
        let service = AccountService::new(db, registry, Arc::new(ManualClock::new(NOW)));
        (temp_dir, service)
    }

    #[tokio::test]
    async fn test_link_flow_persists_account() {
        let (_t, service) = setup().await;

        let request = service
            .begin_link(SocialPlatform::Linkedin, "https://app.test/callback", "state-1")
            .unwrap();
        assert_eq!(request.state, "state-1");

        let account = service
            .complete_link(LinkCallback {
                platform: SocialPlatform::Linkedin,
                code: "abc".to_string(),
                redirect_uri: "https://app.test/callback".to_string(),
                code_verifier: request.code_verifier,
            })
            .await
            .unwrap();

        let stored = service.get(&account.id).await.unwrap();
        assert_eq!(stored.account_name, "Brand Page");
        assert_eq!(stored.external_account_id.as_deref(), Some("urn:li:person:abc"));
        assert_eq!(stored.access_token, "mock-access-abc");
        assert_eq!(stored.refresh_token.as_deref(), Some("mock-refresh-abc"));
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn test_link_unconfigured_platform() {
        let (_t, service) = setup().await;
        let err = service
            .begin_link(SocialPlatform::Facebook, "https://app.test/callback", "s")
            .unwrap_err();
        assert!(matches!(err, SnscastError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_deactivate_and_activate() {
        let (_t, service) = setup().await;
        let account = service
            .add(NewAccount {
                platform: SocialPlatform::Twitter,
                account_name: "@brand".to_string(),
                external_account_id: None,
                access_token: "tok".to_string(),
                refresh_token: None,
                token_expires_at: None,
            })
            .await
            .unwrap();

        service.deactivate(&account.id).await.unwrap();
        assert!(!service.get(&account.id).await.unwrap().is_active);

        service.activate(&account.id).await.unwrap();
        assert!(service.get(&account.id).await.unwrap().is_active);

        let err = service.deactivate("missing").await.unwrap_err();
        assert!(matches!(err, SnscastError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_rejects_empty_token() {
        let (_t, service) = setup().await;
        let err = service
            .add(NewAccount {
                platform: SocialPlatform::Twitter,
                account_name: "@brand".to_string(),
                external_account_id: None,
                access_token: " ".to_string(),
                refresh_token: None,
                token_expires_at: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SnscastError::InvalidInput(_)));
    }
}
