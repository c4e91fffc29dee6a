//! X (Twitter) publishing through API v2 with OAuth 2.0 PKCE

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::http::{self, ApiResponse};
use super::{PlatformAdapter, TokenRefresher};
use crate::error::{PlatformError, Result};
use crate::types::{AccountInfo, AuthorizationRequest, PostData, PublishResult, SocialPlatform, TokenGrant};

const CHARACTER_LIMIT: usize = 280;
const SCOPES: &str = "tweet.read tweet.write users.read offline.access";

pub const API_BASE: &str = "https://api.twitter.com/2";
pub const UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
pub const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";

pub struct TwitterAdapter {
    http: Client,
    client_id: String,
    client_secret: SecretString,
    api_base: String,
    upload_url: String,
}

/// PKCE verifier and its S256 challenge.
fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::thread_rng().gen();
    let code_verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let code_challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());

    (code_verifier, code_challenge)
}

impl TwitterAdapter {
    pub fn new(http: Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            client_id,
            client_secret: SecretString::from(client_secret),
            api_base: API_BASE.to_string(),
            upload_url: UPLOAD_URL.to_string(),
        }
    }

    /// Point API and upload calls at another host.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_url = upload_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let resp = request
            .send()
            .await
            .map_err(|e| http::transport_error(SocialPlatform::Twitter, e))?;
        ApiResponse::read(SocialPlatform::Twitter, resp).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let resp = self
            .send(
                self.http
                    .post(self.endpoint("oauth2/token"))
                    .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
                    .form(form),
            )
            .await?;
        let body = resp.into_body()?;
        Ok(http::token_grant(
            SocialPlatform::Twitter,
            &body,
            chrono::Utc::now().timestamp(),
        )?)
    }

    /// Download the image and push it through the v1.1 media upload.
    async fn upload_media(&self, access_token: &str, image_url: &str) -> Result<String> {
        let image = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| http::transport_error(SocialPlatform::Twitter, e))?;
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
            .map_err(|e| http::transport_error(SocialPlatform::Twitter, e))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let resp = self
            .send(
                self.http
                    .post(&self.upload_url)
                    .bearer_auth(access_token)
                    .form(&[("media_data", encoded.as_str())]),
            )
            .await?;
        let body = resp.into_body()?;
        Ok(http::required_str(SocialPlatform::Twitter, &body, "/media_id_string")?)
    }

    async fn publish(&self, access_token: &str, post: &PostData) -> Result<PublishResult> {
        let mut payload = json!({ "text": post.message });
        if let Some(image_url) = post.image_url.as_deref() {
            let media_id = self.upload_media(access_token, image_url).await?;
            tracing::debug!(media_id = %media_id, "media uploaded");
            payload["media"] = json!({ "media_ids": [media_id] });
        }

        let resp = self
            .send(
                self.http
                    .post(self.endpoint("tweets"))
                    .bearer_auth(access_token)
                    .json(&payload),
            )
            .await?;
        if !resp.is_success() {
            return Ok(resp.rejection());
        }

        Ok(match http::optional_str(&resp.body, "/data/id") {
            Some(id) => PublishResult::published(id, resp.body),
            None => PublishResult::accepted_without_id(resp.body),
        })
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn platform(&self) -> SocialPlatform {
        SocialPlatform::Twitter
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    async fn get_account_info(&self, access_token: &str) -> Result<AccountInfo> {
        let resp = self
            .send(
                self.http
                    .get(self.endpoint("users/me"))
                    .query(&[("user.fields", "profile_image_url")])
                    .bearer_auth(access_token),
            )
            .await?;
        let body = resp.into_body()?;

        let username = http::required_str(SocialPlatform::Twitter, &body, "/data/username")?;
        Ok(AccountInfo {
            id: http::required_str(SocialPlatform::Twitter, &body, "/data/id")?,
            name: http::optional_str(&body, "/data/name").unwrap_or_else(|| username.clone()),
            platform: SocialPlatform::Twitter,
            avatar_url: http::optional_str(&body, "/data/profile_image_url"),
            profile_url: Some(format!("https://x.com/{}", username)),
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
        let (code_verifier, code_challenge) = generate_pkce();
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", SCOPES),
                ("state", state),
                ("code_challenge", code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| PlatformError::Validation(format!("invalid authorization URL: {}", e)))?;

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state: state.to_string(),
            code_verifier: Some(code_verifier),
        })
    }

    async fn handle_oauth_callback(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenGrant> {
        let code_verifier = code_verifier.ok_or_else(|| PlatformError::MissingRequiredField {
            platform: "twitter".to_string(),
            field: "code_verifier".to_string(),
        })?;

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }
}

#[async_trait]
impl TokenRefresher for TwitterAdapter {
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
            ("client_id", self.client_id.as_str()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TwitterAdapter {
        TwitterAdapter::new(Client::new(), "client".to_string(), "secret".to_string())
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let (verifier, challenge) = generate_pkce();
        assert_eq!(verifier.len(), 43);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(challenge, expected);
    }

    #[test]
    fn test_auth_url_carries_pkce() {
        let req = adapter().auth_url("http://localhost/cb", "state-1").unwrap();
        let url = Url::parse(&req.url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["state"], "state-1");
        assert!(params["scope"].contains("offline.access"));
        assert!(req.code_verifier.is_some());
    }

    #[tokio::test]
    async fn test_callback_requires_verifier() {
        let err = adapter()
            .handle_oauth_callback("code", "http://localhost/cb", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("code_verifier"));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_auth_error() {
        let err = adapter()
            .refresh_access_token("access", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SnscastError::Platform(PlatformError::Authentication(_))
        ));
    }

    #[test]
    fn test_character_limit_counts_chars() {
        let post = PostData {
            message: "é".repeat(280),
            ..Default::default()
        };
        assert!(adapter().validate_post(&post).is_ok());
    }
}
