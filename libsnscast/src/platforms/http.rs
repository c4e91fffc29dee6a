//! HTTP plumbing shared by the adapters
//!
//! Turns raw responses into either a decoded JSON body or a classified
//! [`PlatformError`], so each adapter only describes its request sequence.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::error::{PlatformError, Result, SnscastError};
use crate::types::{PublishResult, SocialPlatform, TokenGrant};

/// Meta Graph error codes that mean "slow down".
const GRAPH_THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];
/// Meta Graph error code for an invalid or expired token.
const GRAPH_OAUTH_CODE: i64 = 190;

pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("snscast/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| super::client_error(e).into())
}

/// Map a reqwest failure to a transport error.
pub fn transport_error(platform: SocialPlatform, err: reqwest::Error) -> SnscastError {
    if err.is_decode() {
        PlatformError::MalformedResponse(format!("{}: {}", platform, err)).into()
    } else {
        PlatformError::Network(format!("{}: {}", platform, err)).into()
    }
}

/// A fully read response.
#[derive(Debug)]
pub struct ApiResponse {
    pub platform: SocialPlatform,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    /// Unix time the response arrived; relative rate-limit hints are
    /// measured from here
    pub received_at: i64,
}

impl ApiResponse {
    /// Read the body of `resp`. Error bodies that are not JSON are kept as
    /// strings; a success body that is not JSON is a malformed response.
    pub async fn read(platform: SocialPlatform, resp: Response) -> Result<Self> {
        let received_at = chrono::Utc::now().timestamp();
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(platform, e))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(e) if status.is_success() => {
                    return Err(PlatformError::MalformedResponse(format!(
                        "{}: response is not JSON: {}",
                        platform, e
                    ))
                    .into())
                }
                Err(_) => Value::String(text),
            }
        };

        Ok(Self {
            platform,
            status,
            headers,
            body,
            received_at,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Classify a non-success response.
    pub fn error(&self) -> PlatformError {
        let message = format!(
            "{} API returned {}: {}",
            self.platform,
            self.status.as_u16(),
            error_message(&self.body)
        );

        let graph_code = self.body.pointer("/error/code").and_then(Value::as_i64);

        if self.status == StatusCode::TOO_MANY_REQUESTS
            || graph_code.is_some_and(|c| GRAPH_THROTTLE_CODES.contains(&c))
        {
            return PlatformError::RateLimit {
                message,
                retry_after: retry_after_secs(&self.headers, self.received_at),
            };
        }

        if self.status == StatusCode::UNAUTHORIZED
            || self.status == StatusCode::FORBIDDEN
            || graph_code == Some(GRAPH_OAUTH_CODE)
        {
            return PlatformError::Authentication(message);
        }

        match self.status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                PlatformError::Validation(message)
            }
            _ => PlatformError::Posting(message),
        }
    }

    /// The rejection as a `success = false` publish result.
    pub fn rejection(&self) -> PublishResult {
        PublishResult::rejected(self.error(), self.body.clone())
    }

    /// The decoded body, or the classified error for non-success responses.
    pub fn into_body(self) -> std::result::Result<Value, PlatformError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(self.error())
        }
    }
}

/// Fold API rejections raised with `?` inside a publish flow back into a
/// `success = false` result. Transport errors stay as `Err`.
pub fn settle(result: Result<PublishResult>) -> Result<PublishResult> {
    match result {
        Err(SnscastError::Platform(err))
            if !matches!(
                err,
                PlatformError::Network(_) | PlatformError::MalformedResponse(_)
            ) =>
        {
            Ok(PublishResult::rejected(err, Value::Null))
        }
        other => other,
    }
}

/// Read a required string field, accepting numeric ids too.
pub fn required_str(
    platform: SocialPlatform,
    body: &Value,
    pointer: &str,
) -> std::result::Result<String, PlatformError> {
    match body.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PlatformError::MalformedResponse(format!(
            "{}: response missing {}",
            platform, pointer
        ))),
    }
}

pub fn optional_str(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

/// Decode an OAuth token endpoint response.
pub fn token_grant(
    platform: SocialPlatform,
    body: &Value,
    now: i64,
) -> std::result::Result<TokenGrant, PlatformError> {
    Ok(TokenGrant {
        access_token: required_str(platform, body, "/access_token")?,
        refresh_token: optional_str(body, "/refresh_token"),
        expires_at: body
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|secs| now + secs),
    })
}

fn error_message(body: &Value) -> String {
    let candidates = [
        "/error/message",
        "/error_description",
        "/detail",
        "/errors/0/message",
        "/message",
        "/title",
        "/error",
    ];
    candidates
        .iter()
        .find_map(|p| body.pointer(p).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match body {
            Value::Null => "empty response".to_string(),
            Value::String(s) => s.chars().take(200).collect(),
            other => other.to_string().chars().take(200).collect(),
        })
}

/// Seconds until the platform accepts requests again, as of `now`.
fn retry_after_secs(headers: &HeaderMap, now: i64) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| {
            // Twitter reports an absolute reset time instead
            let reset = headers
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())?;
            u64::try_from(reset.saturating_sub(now)).ok().or(Some(0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn response(status: u16, body: Value) -> ApiResponse {
        ApiResponse {
            platform: SocialPlatform::Facebook,
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body,
            received_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_429_is_rate_limit_with_retry_after() {
        let mut resp = response(429, json!({"title": "Too Many Requests"}));
        resp.headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));

        match resp.error() {
            PlatformError::RateLimit {
                message,
                retry_after,
            } => {
                assert!(message.contains("Too Many Requests"));
                assert_eq!(retry_after, Some(120));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_reset_measured_from_arrival() {
        let mut resp = response(429, json!({"title": "Too Many Requests"}));
        resp.headers
            .insert("x-rate-limit-reset", HeaderValue::from_static("1700000900"));
        assert_eq!(resp.error().retry_after(), Some(900));

        // A reset already in the past means retry straight away
        resp.received_at = 1_700_001_000;
        assert_eq!(resp.error().retry_after(), Some(0));

        // Retry-After wins over the reset header
        resp.headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(resp.error().retry_after(), Some(30));
    }

    #[test]
    fn test_graph_throttle_code_is_rate_limit() {
        let resp = response(400, json!({"error": {"message": "Application request limit reached", "code": 4}}));
        assert!(matches!(resp.error(), PlatformError::RateLimit { .. }));
    }

    #[test]
    fn test_graph_oauth_code_is_authentication() {
        let resp = response(400, json!({"error": {"message": "Session has expired", "code": 190}}));
        assert!(matches!(resp.error(), PlatformError::Authentication(_)));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(response(401, Value::Null).error(), PlatformError::Authentication(_)));
        assert!(matches!(response(403, Value::Null).error(), PlatformError::Authentication(_)));
        assert!(matches!(
            response(400, json!({"detail": "duplicate content"})).error(),
            PlatformError::Validation(_)
        ));
        assert!(matches!(response(503, Value::Null).error(), PlatformError::Posting(_)));
    }

    #[test]
    fn test_error_message_extraction() {
        let resp = response(500, json!({"errors": [{"message": "over capacity"}]}));
        assert!(resp.error().to_string().contains("over capacity"));

        let resp = response(502, Value::String("<html>bad gateway</html>".to_string()));
        assert!(resp.error().to_string().contains("bad gateway"));
    }

    #[test]
    fn test_settle_keeps_transport_errors() {
        let rejected = settle(Err(PlatformError::Authentication("revoked".into()).into())).unwrap();
        assert!(!rejected.success);
        assert_eq!(
            rejected.error,
            Some(PlatformError::Authentication("revoked".into()))
        );

        let transport = settle(Err(PlatformError::Network("reset".into()).into()));
        assert!(matches!(
            transport,
            Err(SnscastError::Platform(PlatformError::Network(_)))
        ));
    }

    #[test]
    fn test_required_str_accepts_numbers() {
        let body = json!({"id": 12345, "name": ""});
        assert_eq!(required_str(SocialPlatform::Facebook, &body, "/id").unwrap(), "12345");
        assert!(matches!(
            required_str(SocialPlatform::Facebook, &body, "/name"),
            Err(PlatformError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_token_grant_computes_expiry() {
        let body = json!({"access_token": "a", "refresh_token": "r", "expires_in": 3600});
        let grant = token_grant(SocialPlatform::Twitter, &body, 1_000).unwrap();
        assert_eq!(grant.access_token, "a");
        assert_eq!(grant.refresh_token.as_deref(), Some("r"));
        assert_eq!(grant.expires_at, Some(4_600));

        let grant = token_grant(SocialPlatform::Twitter, &json!({"access_token": "a"}), 1_000).unwrap();
        assert_eq!(grant.expires_at, None);
    }
}
