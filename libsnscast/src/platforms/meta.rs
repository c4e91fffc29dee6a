//! Meta Graph API app shared by the Facebook and Instagram adapters
//!
//! Both platforms authorize through the same Facebook login dialog and
//! exchange tokens against the same Graph endpoints. Meta has no refresh
//! tokens: a still-valid long-lived token is traded for a fresh one with the
//! `fb_exchange_token` grant.

use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::http::{self, ApiResponse};
use crate::error::{PlatformError, Result};
use crate::types::{AuthorizationRequest, SocialPlatform, TokenGrant};

pub const GRAPH_BASE: &str = "https://graph.facebook.com/v21.0";
pub const DIALOG_URL: &str = "https://www.facebook.com/v21.0/dialog/oauth";

pub struct MetaApp {
    platform: SocialPlatform,
    http: Client,
    client_id: String,
    client_secret: SecretString,
    graph_base: String,
    dialog_url: String,
}

impl MetaApp {
    pub fn new(platform: SocialPlatform, http: Client, client_id: String, client_secret: String) -> Self {
        Self {
            platform,
            http,
            client_id,
            client_secret: SecretString::from(client_secret),
            graph_base: GRAPH_BASE.to_string(),
            dialog_url: DIALOG_URL.to_string(),
        }
    }

    /// Point Graph calls at another host, e.g. a local stub server.
    pub fn with_graph_base(mut self, base: impl Into<String>) -> Self {
        self.graph_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.graph_base, path.trim_start_matches('/'))
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn platform(&self) -> SocialPlatform {
        self.platform
    }

    pub fn auth_url(&self, redirect_uri: &str, state: &str, scopes: &str) -> Result<AuthorizationRequest> {
        let url = Url::parse_with_params(
            &self.dialog_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("scope", scopes),
                ("response_type", "code"),
            ],
        )
        .map_err(|e| PlatformError::Validation(format!("invalid authorization URL: {}", e)))?;

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state: state.to_string(),
            code_verifier: None,
        })
    }

    /// GET a Graph path with query parameters and return the decoded body.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .get(self.endpoint(path))
            .query(query)
            .send()
            .await
            .map_err(|e| http::transport_error(self.platform, e))?;

        Ok(ApiResponse::read(self.platform, resp).await?.into_body()?)
    }

    /// POST a form to a Graph path and return the response unclassified.
    pub async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<ApiResponse> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .form(form)
            .send()
            .await
            .map_err(|e| http::transport_error(self.platform, e))?;

        ApiResponse::read(self.platform, resp).await
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let body = self
            .get(
                "oauth/access_token",
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.expose_secret()),
                    ("redirect_uri", redirect_uri),
                    ("code", code),
                ],
            )
            .await?;
        let short_lived = http::token_grant(self.platform, &body, chrono::Utc::now().timestamp())?;

        // Short-lived user tokens last about an hour; trade up straight away
        self.exchange_token(&short_lived.access_token).await
    }

    /// Trade a valid token for a fresh long-lived one.
    pub async fn exchange_token(&self, access_token: &str) -> Result<TokenGrant> {
        let body = self
            .get(
                "oauth/access_token",
                &[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.expose_secret()),
                    ("fb_exchange_token", access_token),
                ],
            )
            .await?;

        let mut grant = http::token_grant(self.platform, &body, chrono::Utc::now().timestamp())?;
        grant.refresh_token = None;
        Ok(grant)
    }

    /// Pages the user manages, as raw Graph entries with the requested fields.
    pub async fn managed_pages(&self, access_token: &str, fields: &str) -> Result<Vec<Value>> {
        let body = self
            .get("me/accounts", &[("fields", fields), ("access_token", access_token)])
            .await?;

        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> MetaApp {
        MetaApp::new(
            SocialPlatform::Facebook,
            Client::new(),
            "1234".to_string(),
            "shh".to_string(),
        )
    }

    #[test]
    fn test_auth_url_has_scopes_and_state() {
        let req = app()
            .auth_url("https://app.example.com/cb", "xyz", "pages_manage_posts,public_profile")
            .unwrap();
        let url = Url::parse(&req.url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("www.facebook.com"));
        assert_eq!(params["client_id"], "1234");
        assert_eq!(params["state"], "xyz");
        assert_eq!(params["scope"], "pages_manage_posts,public_profile");
        assert_eq!(params["redirect_uri"], "https://app.example.com/cb");
        assert!(req.code_verifier.is_none());
        assert!(!req.url.contains("shh"));
    }

    #[test]
    fn test_graph_base_override() {
        let app = app().with_graph_base("http://127.0.0.1:9999/");
        assert_eq!(app.endpoint("/me/accounts"), "http://127.0.0.1:9999/me/accounts");
    }
}
