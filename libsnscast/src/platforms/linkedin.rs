//! LinkedIn member publishing through the UGC Posts API

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{self, ApiResponse};
use super::{PlatformAdapter, TokenRefresher};
use crate::error::{PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

const CHARACTER_LIMIT: usize = 3_000;
const SCOPES: &str = "openid profile w_member_social";

pub const API_BASE: &str = "https://api.linkedin.com/v2";
pub const OAUTH_BASE: &str = "https://www.linkedin.com/oauth/v2";

pub struct LinkedinAdapter {
    http: Client,
    client_id: String,
    client_secret: SecretString,
    api_base: String,
    oauth_base: String,
}

impl LinkedinAdapter {
    pub fn new(http: Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            client_id,
            client_secret: SecretString::from(client_secret),
            api_base: API_BASE.to_string(),
            oauth_base: OAUTH_BASE.to_string(),
        }
    }

    pub fn with_endpoints(mut self, api_base: impl Into<String>, oauth_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.oauth_base = oauth_base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let resp = request
            .send()
            .await
            .map_err(|e| http::transport_error(SocialPlatform::Linkedin, e))?;
        ApiResponse::read(SocialPlatform::Linkedin, resp).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let mut form = form.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.expose_secret()));

        let resp = self
            .send(
                self.http
                    .post(format!("{}/accessToken", self.oauth_base))
                    .form(&form),
            )
            .await?;
        let body = resp.into_body()?;
        Ok(http::token_grant(
            SocialPlatform::Linkedin,
            &body,
            chrono::Utc::now().timestamp(),
        )?)
    }

    async fn author_urn(&self, access_token: &str, target_id: Option<&str>) -> Result<String> {
        let member_id = match target_id {
            Some(id) => id.to_string(),
            None => {
                let body = self
                    .send(self.http.get(self.endpoint("userinfo")).bearer_auth(access_token))
                    .await?
                    .into_body()?;
                http::required_str(SocialPlatform::Linkedin, &body, "/sub")?
            }
        };
        Ok(format!("urn:li:person:{}", member_id))
    }

    /// Register an image upload, copy the image bytes over, and return the
    /// digital media asset URN.
    async fn upload_image(&self, access_token: &str, author: &str, image_url: &str) -> Result<String> {
        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": author,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });
        let body = self
            .send(
                self.http
                    .post(self.endpoint("assets"))
                    .query(&[("action", "registerUpload")])
                    .bearer_auth(access_token)
                    .json(&register),
            )
            .await?
            .into_body()?;

        let upload_url = http::required_str(
            SocialPlatform::Linkedin,
            &body,
            "/value/uploadMechanism/com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest/uploadUrl",
        )?;
        let asset = http::required_str(SocialPlatform::Linkedin, &body, "/value/asset")?;

        let image = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| http::transport_error(SocialPlatform::Linkedin, e))?;
        if !image.status().is_success() {
            return Err(PlatformError::Validation(format!(
                "Image {} could not be fetched: HTTP {}",
                image_url,
                image.status().as_u16()
            ))
            .into());
        }
        let bytes = image
            .bytes()
            .await
            .map_err(|e| http::transport_error(SocialPlatform::Linkedin, e))?;

        self.send(self.http.put(&upload_url).bearer_auth(access_token).body(bytes))
            .await?
            .into_body()?;

        Ok(asset)
    }

    async fn publish(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        let author = self.author_urn(access_token, post.target_id.as_deref()).await?;

        let (category, media) = match (post.image_url.as_deref(), post.link.as_deref()) {
            (Some(image_url), _) => {
                let asset = self.upload_image(access_token, &author, image_url).await?;
                ("IMAGE", vec![json!({ "status": "READY", "media": asset })])
            }
            (None, Some(link)) => ("ARTICLE", vec![json!({ "status": "READY", "originalUrl": link })]),
            (None, None) => ("NONE", Vec::new()),
        };

        let mut share = json!({
            "shareCommentary": { "text": post.message },
            "shareMediaCategory": category,
        });
        if !media.is_empty() {
            share["media"] = Value::Array(media);
        }

        let payload = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
        });

        let resp = self
            .send(
                self.http
                    .post(self.endpoint("ugcPosts"))
                    .bearer_auth(access_token)
                    .header("X-Restli-Protocol-Version", "2.0.0")
                    .json(&payload),
            )
            .await?;
        if !resp.is_success() {
            return Ok(resp.rejection());
        }

        let id = http::optional_str(&resp.body, "/id").or_else(|| {
            resp.headers
                .get("x-restli-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        Ok(match id {
            Some(id) => PublishResult::published(id, resp.body),
            None => PublishResult::accepted_without_id(resp.body),
        })
    }
}

#[async_trait]
impl PlatformAdapter for LinkedinAdapter {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Linkedin
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo> {
        let body = self
            .send(self.http.get(self.endpoint("userinfo")).bearer_auth(access_token))
            .await?
            .into_body()?;

        let id = http::required_str(SocialPlatform::Linkedin, &body, "/sub")?;
        Ok(AccountInfo {
            name: http::optional_str(&body, "/name").unwrap_or_else(|| id.clone()),
            platform: SocialPlatform::Linkedin,
            avatar_url: http::optional_str(&body, "/picture"),
            profile_url: None,
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
        let url = Url::parse_with_params(
            &format!("{}/authorization", self.oauth_base),
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("scope", SCOPES),
            ],
        )
        .map_err(|e| PlatformError::Validation(format!("invalid authorization URL: {}", e)))?;

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state: state.to_string(),
            code_verifier: None,
        })
    }

    async fn handle_oauth_callback(
        &self,
        code: &str,
        redirect_uri: &str,
        _code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }
}

#[async_trait]
impl TokenRefresher for LinkedinAdapter {
    async fn refresh_access_token(
        &self,
        _access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        let refresh_token = refresh_token.ok_or_else(|| {
            PlatformError::Authentication("no refresh token stored for this account".to_string())
        })?;

        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
