//! Mock platform adapter for testing
//!
//! A scriptable [`PlatformAdapter`] that can simulate successes, rejections,
//! transport failures, hangs and token refreshes. It makes no network calls,
//! so dispatcher and CLI tests can exercise every outcome deterministically.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

use super::{PlatformAdapter, TokenRefresher};
use crate::error::{PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

/// Outcome of one `publish_post` call
#[derive(Debug, Clone)]
pub enum MockPublish {
    /// Accepted with an auto-generated post id
    Success,
    /// Accepted with this post id
    SuccessWithId(String),
    /// Accepted, but the platform returned no post id
    SuccessWithoutId,
    /// Rejected by the platform (`Ok` with `success = false`)
    Rejected(PlatformError),
    /// Request could not be completed (`Err`)
    TransportError(PlatformError),
    /// Never answers
    Hang,
}

/// Outcome of one refresh call
#[derive(Debug, Clone)]
pub enum MockRefresh {
    Success(TokenGrant),
    Failure(PlatformError),
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock adapter for testing
pub struct MockAdapter {
    platform: SocialPlatform,
    character_limit: Option<usize>,
    requires_image: bool,
    delay: Duration,
    script: Mutex<VecDeque<MockPublish>>,
    fallback: MockPublish,
    refresh: Option<MockRefresh>,
    refresh_delay: Duration,
    account_info: Option<AccountInfo>,
    publish_call_count: Mutex<usize>,
    refresh_call_count: Mutex<usize>,
    published_posts: Mutex<Vec<PostData>>,
    tokens_used: Mutex<Vec<String>>,
}

impl MockAdapter {
    /// Create a mock that accepts every post
    pub fn new(platform: SocialPlatform) -> Self {
        Self {
            platform,
            character_limit: None,
            requires_image: false,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: MockPublish::Success,
            refresh: None,
            refresh_delay: Duration::ZERO,
            account_info: None,
            publish_call_count: Mutex::new(0),
            refresh_call_count: Mutex::new(0),
            published_posts: Mutex::new(Vec::new()),
            tokens_used: Mutex::new(Vec::new()),
        }
    }

    /// Outcomes for the next calls, in order. Once used up, the fallback
    /// outcome applies.
    pub fn with_script(self, outcomes: Vec<MockPublish>) -> Self {
        *lock(&self.script) = outcomes.into();
        self
    }

    /// Outcome once the script is used up
    pub fn with_fallback(mut self, outcome: MockPublish) -> Self {
        self.fallback = outcome;
        self
    }

    /// Enable the refresh capability with this outcome
    pub fn with_refresh(mut self, outcome: MockRefresh) -> Self {
        self.refresh = Some(outcome);
        self
    }

    /// Delay before each refresh answers
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Delay before each publish answers
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_character_limit(mut self, limit: usize) -> Self {
        self.character_limit = Some(limit);
        self
    }

    pub fn requiring_image(mut self) -> Self {
        self.requires_image = true;
        self
    }

    pub fn with_account_info(mut self, info: AccountInfo) -> Self {
        self.account_info = Some(info);
        self
    }

    /// Get the number of times publish_post was called
    pub fn publish_call_count(&self) -> usize {
        *lock(&self.publish_call_count)
    }

    /// Get the number of times refresh_access_token was called
    pub fn refresh_call_count(&self) -> usize {
        *lock(&self.refresh_call_count)
    }

    /// Posts that passed validation, in call order
    pub fn published_posts(&self) -> Vec<PostData> {
        lock(&self.published_posts).clone()
    }

    /// Access tokens seen by publish_post, in call order
    pub fn tokens_used(&self) -> Vec<String> {
        lock(&self.tokens_used).clone()
    }

    fn next_outcome(&self) -> MockPublish {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> SocialPlatform {
        self.platform
    }

    fn character_limit(&self) -> Option<usize> {
        self.character_limit
    }

    fn requires_image(&self) -> bool {
        self.requires_image
    }

    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo> {
        if access_token.is_empty() {
            return Err(PlatformError::Authentication("empty access token".to_string()).into());
        }
        Ok(self.account_info.clone().unwrap_or_else(|| AccountInfo {
            id: format!("mock-{}-user", self.platform),
            name: format!("Mock {} account", self.platform),
            platform: self.platform,
            avatar_url: None,
            profile_url: None,
        }))
    }

    async fn publish_post(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        let call = {
            let mut count = lock(&self.publish_call_count);
            *count += 1;
            *count
        };
        lock(&self.tokens_used).push(access_token.to_string());

        if let Err(e) = self.validate_post(post) {
            return Ok(PublishResult::rejected(e, serde_json::Value::Null));
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_outcome() {
            MockPublish::Success => {
                lock(&self.published_posts).push(post.clone());
                let id = format!("mock-{}-{}", self.platform, call);
                Ok(PublishResult::published(id.clone(), serde_json::json!({ "id": id })))
            }
            MockPublish::SuccessWithId(id) => {
                lock(&self.published_posts).push(post.clone());
                Ok(PublishResult::published(id.clone(), serde_json::json!({ "id": id })))
            }
            MockPublish::SuccessWithoutId => {
                lock(&self.published_posts).push(post.clone());
                Ok(PublishResult::accepted_without_id(serde_json::json!({})))
            }
            MockPublish::Rejected(err) => Ok(PublishResult::rejected(
                err.clone(),
                serde_json::json!({ "error": err.to_string() }),
            )),
            MockPublish::TransportError(err) => Err(err.into()),
            MockPublish::Hang => std::future::pending().await,
        }
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        if self.refresh.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn auth_url(&self, redirect_uri: &str, state: &str) -> Result<AuthorizationRequest> {
        Ok(AuthorizationRequest {
            url: format!(
                "https://mock.invalid/{}/authorize?redirect_uri={}&state={}",
                self.platform, redirect_uri, state
            ),
            state: state.to_string(),
            code_verifier: Some("mock-verifier".to_string()),
        })
    }

    async fn handle_oauth_callback(
        &self,
        code: &str,
        _redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        if code.is_empty() {
            return Err(PlatformError::Authentication("empty authorization code".to_string()).into());
        }
        Ok(TokenGrant {
            access_token: format!("mock-access-{}", code),
            refresh_token: Some(format!("mock-refresh-{}", code)),
            expires_at: None,
        })
    }
}

#[async_trait]
impl TokenRefresher for MockAdapter {
    async fn refresh_access_token(
        &self,
        _access_token: &str,
        _refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        *lock(&self.refresh_call_count) += 1;

        if !self.refresh_delay.is_zero() {
            sleep(self.refresh_delay).await;
        }

        match &self.refresh {
            Some(MockRefresh::Success(grant)) => Ok(grant.clone()),
            Some(MockRefresh::Failure(err)) => Err(err.clone().into()),
            None => Err(PlatformError::NotImplemented("token refresh".to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(message: &str) -> PostData {
        PostData {
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockAdapter::new(SocialPlatform::Twitter).with_script(vec![
            MockPublish::Rejected(PlatformError::Posting("503".into())),
            MockPublish::SuccessWithId("tw-1".into()),
        ]);

        let first = mock.publish_post("t", &post("a")).await.unwrap();
        assert!(!first.success);

        let second = mock.publish_post("t", &post("b")).await.unwrap();
        assert_eq!(second.external_post_id.as_deref(), Some("tw-1"));

        let third = mock.publish_post("t", &post("c")).await.unwrap();
        assert!(third.success);
        assert_eq!(mock.publish_call_count(), 3);
        assert_eq!(mock.published_posts().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_err() {
        let mock = MockAdapter::new(SocialPlatform::Linkedin)
            .with_fallback(MockPublish::TransportError(PlatformError::Network("reset".into())));
        assert!(mock.publish_post("t", &post("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_validation_runs_first() {
        let mock = MockAdapter::new(SocialPlatform::Instagram).requiring_image();
        let result = mock.publish_post("t", &post("no image")).await.unwrap();
        assert!(matches!(
            result.error,
            Some(PlatformError::MissingRequiredField { .. })
        ));
        assert!(mock.published_posts().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_capability_is_optional() {
        let mock = MockAdapter::new(SocialPlatform::Facebook);
        assert!(mock.token_refresher().is_none());

        let grant = TokenGrant {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: Some(100),
        };
        let mock = mock.with_refresh(MockRefresh::Success(grant.clone()));
        let refresher = mock.token_refresher().unwrap();
        assert_eq!(refresher.refresh_access_token("old", None).await.unwrap(), grant);
        assert_eq!(mock.refresh_call_count(), 1);
    }
}
