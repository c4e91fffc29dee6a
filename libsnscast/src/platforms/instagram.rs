//! Instagram business account publishing through the Graph API
//!
//! Publishing is two calls: create a media container from a public image
//! URL, then publish the container. Text-only posts are not possible.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::http;
use super::meta::MetaApp;
use super::{PlatformAdapter, TokenRefresher};
use crate::error::{PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

const CHARACTER_LIMIT: usize = 2_200;
const SCOPES: &str = "instagram_basic,instagram_content_publish,pages_read_engagement";

pub struct InstagramAdapter {
    app: MetaApp,
}

impl InstagramAdapter {
    pub fn new(http: Client, app_id: String, app_secret: String) -> Self {
        Self {
            app: MetaApp::new(SocialPlatform::Instagram, http, app_id, app_secret),
        }
    }

    pub fn with_graph_base(mut self, base: impl Into<String>) -> Self {
        self.app = self.app.with_graph_base(base);
        self
    }

    /// The business account id: `target_id` when known, otherwise the first
    /// Page with a connected Instagram account.
    async fn business_account_id(&self, access_token: &str, target_id: Option<&str>) -> Result<String> {
        if let Some(id) = target_id {
            return Ok(id.to_string());
        }

        let pages = self
            .app
            .managed_pages(access_token, "instagram_business_account")
            .await?;

        pages
            .iter()
            .find_map(|p| http::required_str(SocialPlatform::Instagram, p, "/instagram_business_account/id").ok())
            .ok_or_else(|| {
                PlatformError::Validation(
                    "No Instagram business account is connected to this login".to_string(),
                )
                .into()
            })
    }

    async fn publish(&self, access_token: &str, post: &PostData, image_url: &str) -> Result<PublishResult> {
        let ig_id = self
            .business_account_id(access_token, post.target_id.as_deref())
            .await?;

        let container = self
            .app
            .post_form(
                &format!("{}/media", ig_id),
                &[
                    ("image_url", image_url),
                    ("caption", post.message.as_str()),
                    ("access_token", access_token),
                ],
            )
            .await?;
        if !container.is_success() {
            return Ok(container.rejection());
        }
        let creation_id = http::required_str(SocialPlatform::Instagram, &container.body, "/id")?;
        tracing::debug!(creation_id = %creation_id, "media container created");

        let published = self
            .app
            .post_form(
                &format!("{}/media_publish", ig_id),
                &[
                    ("creation_id", creation_id.as_str()),
                    ("access_token", access_token),
                ],
            )
            .await?;
        if !published.is_success() {
            return Ok(published.rejection());
        }

        Ok(match http::optional_str(&published.body, "/id") {
            Some(id) => PublishResult::published(id, published.body),
            None => PublishResult::accepted_without_id(published.body),
        })
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Instagram
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn requires_image(&self) -> bool {
        true
    }

    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo> {
        let ig_id = self.business_account_id(access_token, None).await?;
        let body = self
            .app
            .get(
                &ig_id,
                &[
                    ("fields", "id,username,profile_picture_url"),
                    ("access_token", access_token),
                ],
            )
            .await?;

        let username = http::optional_str(&body, "/username").unwrap_or_else(|| ig_id.clone());
        Ok(AccountInfo {
            id: http::required_str(SocialPlatform::Instagram, &body, "/id")?,
            profile_url: Some(format!("https://www.instagram.com/{}", username)),
            name: username,
            platform: SocialPlatform::Instagram,
            avatar_url: http::optional_str(&body, "/profile_picture_url"),
        })
    }

    async fn publish_post(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        if let Err(e) = self.validate_post(post) {
            return Ok(PublishResult::rejected(e, Value::Null));
        }
        let Some(image_url) = post.image_url.as_deref() else {
            return Ok(PublishResult::rejected(
                PlatformError::MissingRequiredField {
                    platform: "instagram".to_string(),
                    field: "image_url".to_string(),
                },
                Value::Null,
            ));
        };
        http::settle(self.publish(access_token, post, image_url).await)
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
impl TokenRefresher for InstagramAdapter {
    async fn refresh_access_token(
        &self,
        access_token: &str,
        _refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        self.app.exchange_token(access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_image_rejected_without_network() {
        let adapter = InstagramAdapter::new(Client::new(), "app".into(), "secret".into())
            .with_graph_base("http://127.0.0.1:1");
        let post = PostData {
            message: "caption only".to_string(),
            ..Default::default()
        };

        let result = adapter.publish_post("token", &post).await.unwrap();
        assert!(!result.success);
        assert_eq!(
            result.error,
            Some(PlatformError::MissingRequiredField {
                platform: "instagram".to_string(),
                field: "image_url".to_string(),
            })
        );
    }

    #[test]
    fn test_caption_limit() {
        let adapter = InstagramAdapter::new(Client::new(), "app".into(), "secret".into());
        let post = PostData {
            message: "x".repeat(2_201),
            image_url: Some("https://cdn.example.com/a.jpg".to_string()),
            ..Default::default()
        };
        assert!(matches!(adapter.validate_post(&post), Err(PlatformError::Validation(_))));
    }
}
