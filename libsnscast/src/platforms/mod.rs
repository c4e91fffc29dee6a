//! Platform adapters
//!
//! Each social network is reached through a [`PlatformAdapter`]. Adapters own
//! every platform quirk: payload shapes, multi-step media flows, character
//! limits and OAuth endpoints. The dispatcher only ever sees a
//! [`PublishResult`].
//!
//! # Error contract
//!
//! `publish_post` reports ordinary API rejections (rate limits, validation,
//! missing fields, revoked tokens) as `Ok(PublishResult { success: false, .. })`
//! carrying a typed [`PlatformError`]. Only transport problems, where the
//! request could not be completed or the answer could not be read, come back
//! as `Err`.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use libsnscast::platforms::{AdapterRegistry, mock::MockAdapter};
//! use libsnscast::types::{PostData, SocialPlatform};
//!
//! # async fn example() -> libsnscast::Result<()> {
//! let registry = AdapterRegistry::new()
//!     .with(Arc::new(MockAdapter::new(SocialPlatform::Twitter)));
//!
//! let adapter = registry.get(SocialPlatform::Twitter).unwrap();
//! let post = PostData { message: "Hello".to_string(), ..Default::default() };
//! let result = adapter.publish_post("token", &post).await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ConfigError, PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

pub mod facebook;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod meta;
pub mod twitter;

// Mock adapter is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Uniform contract over one social network.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Capability tag
    fn platform(&self) -> SocialPlatform;

    /// Maximum message length in characters, if the platform has one
    fn character_limit(&self) -> Option<usize>;

    /// Whether every post must carry an image
    fn requires_image(&self) -> bool {
        false
    }

    /// Check platform constraints without touching the network.
    ///
    /// # Errors
    ///
    /// `MissingRequiredField` when a mandatory field is absent, `Validation`
    /// for anything else the platform would reject.
    fn validate_post(&self, post: &PostData) -> std::result::Result<(), PlatformError> {
        validate_common(self.platform(), self.character_limit(), self.requires_image(), post)
    }

    /// Look up the profile behind an access token.
    ///
    /// # Errors
    ///
    /// `PlatformError::Authentication` if the token is invalid or expired.
    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo>;

    /// Publish a post, running every step the platform needs.
    async fn publish_post(&self, access_token: &str, post: &PostData) -> Result<PublishResult>;

    /// Refresh capability, for platforms that support it
    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        None
    }

    /// Authorization URL for linking a new account
    fn auth_url(&self, redirect_uri: &str, state: &str) -> Result<AuthorizationRequest>;

    /// Exchange an authorization code for tokens
    async fn handle_oauth_callback(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant>;
}

/// Optional capability: obtain a fresh access token before the current one
/// expires.
///
/// Platforms with OAuth 2.0 refresh tokens use `refresh_token`; platforms
/// that only exchange long-lived tokens use `access_token`.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant>;
}

/// Checks shared by every adapter.
pub fn validate_common(
    platform: SocialPlatform,
    character_limit: Option<usize>,
    requires_image: bool,
    post: &PostData,
) -> std::result::Result<(), PlatformError> {
    if post.message.trim().is_empty() {
        return Err(PlatformError::Validation(
            "Message cannot be empty".to_string(),
        ));
    }

    if let Some(limit) = character_limit {
        let length = post.message.chars().count();
        if length > limit {
            return Err(PlatformError::Validation(format!(
                "Message is {} characters, {} allows at most {}",
                length, platform, limit
            )));
        }
    }

    if requires_image && post.image_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        return Err(PlatformError::MissingRequiredField {
            platform: platform.to_string(),
            field: "image_url".to_string(),
        });
    }

    Ok(())
}

/// Adapters keyed by platform.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SocialPlatform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: SocialPlatform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<SocialPlatform> {
        let mut platforms: Vec<_> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }

    /// Build HTTP adapters for every platform with a `[platforms.*]` section.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client(Duration::from_secs(config.scheduling.publish_timeout))?;
        let mut registry = Self::new();

        for platform in SocialPlatform::ALL {
            if !config.platforms.is_enabled(platform) {
                continue;
            }
            let creds = config.platforms.credentials(platform)?;
            let adapter: Arc<dyn PlatformAdapter> = match platform {
                SocialPlatform::Facebook => Arc::new(facebook::FacebookAdapter::new(
                    client.clone(),
                    creds.client_id,
                    creds.client_secret,
                )),
                SocialPlatform::Instagram => Arc::new(instagram::InstagramAdapter::new(
                    client.clone(),
                    creds.client_id,
                    creds.client_secret,
                )),
                SocialPlatform::Twitter => Arc::new(twitter::TwitterAdapter::new(
                    client.clone(),
                    creds.client_id,
                    creds.client_secret,
                )),
                SocialPlatform::Linkedin => Arc::new(linkedin::LinkedinAdapter::new(
                    client.clone(),
                    creds.client_id,
                    creds.client_secret,
                )),
            };
            registry.register(adapter);
        }

        if registry.adapters.is_empty() {
            tracing::warn!("no platforms configured; add a [platforms.*] section to publish");
        }

        Ok(registry)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}

pub(crate) fn client_error(reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        field: "http client".to_string(),
        reason: reason.to_string(),
    }
}
