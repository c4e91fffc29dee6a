//! Facebook Page publishing through the Graph API

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::http::{self, ApiResponse};
use super::meta::MetaApp;
use super::{PlatformAdapter, TokenRefresher};
use crate::error::{PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

const CHARACTER_LIMIT: usize = 63_206;
const SCOPES: &str = "pages_manage_posts,pages_read_engagement,public_profile";

/// Publishes to a Page the linked user manages.
///
/// The stored token is a user token; each publish looks up the Page token
/// through `/me/accounts`. `target_id` picks the Page, otherwise the first
/// managed Page is used.
pub struct FacebookAdapter {
    app: MetaApp,
}

impl FacebookAdapter {
    pub fn new(http: Client, app_id: String, app_secret: String) -> Self {
        Self {
            app: MetaApp::new(SocialPlatform::Facebook, http, app_id, app_secret),
        }
    }

    pub fn with_graph_base(mut self, base: impl Into<String>) -> Self {
        self.app = self.app.with_graph_base(base);
        self
    }

    async fn page_token(&self, access_token: &str, target_id: Option<&str>) -> Result<(String, String)> {
        let pages = self
            .app
            .managed_pages(access_token, "id,name,access_token")
            .await?;

        let page = match target_id {
            Some(id) => pages
                .iter()
                .find(|p| p.get("id").and_then(Value::as_str) == Some(id)),
            None => pages.first(),
        };

        let page = page.ok_or_else(|| {
            PlatformError::Validation(match target_id {
                Some(id) => format!("Page {} is not managed by this account", id),
                None => "Account manages no Facebook Pages".to_string(),
            })
        })?;

        let page_id = http::required_str(SocialPlatform::Facebook, page, "/id")?;
        let page_token = http::required_str(SocialPlatform::Facebook, page, "/access_token")?;
        Ok((page_id, page_token))
    }

    async fn publish(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        let (page_id, page_token) = self.page_token(access_token, post.target_id.as_deref()).await?;

        let resp: ApiResponse = match post.image_url.as_deref() {
            Some(image_url) => {
                tracing::debug!(page_id = %page_id, "publishing photo post");
                self.app
                    .post_form(
                        &format!("{}/photos", page_id),
                        &[
                            ("url", image_url),
                            ("caption", post.message.as_str()),
                            ("access_token", page_token.as_str()),
                        ],
                    )
                    .await?
            }
            None => {
                tracing::debug!(page_id = %page_id, "publishing feed post");
                let mut form = vec![
                    ("message", post.message.as_str()),
                    ("access_token", page_token.as_str()),
                ];
                if let Some(link) = post.link.as_deref() {
                    form.push(("link", link));
                }
                self.app.post_form(&format!("{}/feed", page_id), &form).await?
            }
        };

        if !resp.is_success() {
            return Ok(resp.rejection());
        }

        // Photo uploads answer with both the photo id and the feed post id
        let id = http::optional_str(&resp.body, "/post_id")
            .map(Ok)
            .unwrap_or_else(|| http::required_str(SocialPlatform::Facebook, &resp.body, "/id"));

        match id {
            Ok(id) => Ok(PublishResult::published(id, resp.body)),
            Err(_) => Ok(PublishResult::accepted_without_id(resp.body)),
        }
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Facebook
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo> {
        let body = self
            .app
            .get(
                "me",
                &[("fields", "id,name,picture"), ("access_token", access_token)],
            )
            .await?;

        let id = http::required_str(SocialPlatform::Facebook, &body, "/id")?;
        Ok(AccountInfo {
            profile_url: Some(format!("https://www.facebook.com/{}", id)),
            name: http::optional_str(&body, "/name").unwrap_or_else(|| id.clone()),
            avatar_url: http::optional_str(&body, "/picture/data/url"),
            platform: SocialPlatform::Facebook,
            id,
        })
    }

    async fn publish_post(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        if let Err(e) = self.validate_post(post) {
            return Ok(PublishResult::rejected(e, Value::Null));
        }
        http::settle(self.publish(access_token, post).await)
    }

    fn token_refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }

    fn auth_url(&self, redirect_uri: &str, state: &str) -> Result<AuthorizationRequest> {
        self.app.auth_url(redirect_uri, state, SCOPES)
    }

    async fn handle_oauth_callback(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        self.app.exchange_code(code, redirect_uri).await
    }
}

#[async_trait]
impl TokenRefresher for FacebookAdapter {
    /// Meta issues no refresh tokens, so the current long-lived token is what
    /// gets exchanged.
    async fn refresh_access_token(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        self.app.exchange_token(access_token).await
    }
}
