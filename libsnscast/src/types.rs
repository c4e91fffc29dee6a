//! Core types for Snscast

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use uuid::Uuid;

use crate::content::{ContentRef, ContentType};
use crate::error::PlatformError;

/// Social networks a post can target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 4] = [
        SocialPlatform::Facebook,
        SocialPlatform::Instagram,
        SocialPlatform::Twitter,
        SocialPlatform::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Facebook => "facebook",
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Linkedin => "linkedin",
        }
    }
}

impl FromStr for SocialPlatform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facebook" => Ok(SocialPlatform::Facebook),
            "instagram" => Ok(SocialPlatform::Instagram),
            "twitter" | "x" => Ok(SocialPlatform::Twitter),
            "linkedin" => Ok(SocialPlatform::Linkedin),
            _ => Err(format!(
                "Invalid platform: '{}'. Valid options: facebook, instagram, twitter, linkedin",
                s
            )),
        }
    }
}

impl std::fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a scheduled post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PostStatus::Pending),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            _ => Err(format!("Invalid post status: '{}'", s)),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work: publish one message to one account at one time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledPost {
    pub id: String,
    pub content_type: ContentType,
    pub content_id: i64,
    pub platform: SocialPlatform,
    pub account_id: String,
    pub message: String,
    pub image_url: Option<String>,
    pub link: Option<String>,
    pub scheduled_at: i64,
    pub status: PostStatus,
    pub published_at: Option<i64>,
    pub external_post_id: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_attempt_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ScheduledPost {
    /// New `pending` row for one account, built from a post template.
    pub fn new_pending(
        content: ContentRef,
        account: &SocialAccount,
        template: PostData,
        scheduled_at: i64,
        max_retries: u32,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content_type: content.content_type,
            content_id: content.content_id,
            platform: account.platform,
            account_id: account.id.clone(),
            message: template.message,
            image_url: template.image_url,
            link: template.link,
            scheduled_at,
            status: PostStatus::Pending,
            published_at: None,
            external_post_id: None,
            error: None,
            retry_count: 0,
            max_retries,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn content_ref(&self) -> ContentRef {
        ContentRef::new(self.content_type, self.content_id)
    }

    /// A failed row whose retry budget is spent. Never dispatched again.
    pub fn is_exhausted(&self) -> bool {
        self.status == PostStatus::Failed && self.retry_count >= self.max_retries
    }

    /// Published, cancelled and exhausted rows accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PostStatus::Published | PostStatus::Cancelled) || self.is_exhausted()
    }

    /// Operator-facing state, distinguishing retrying from exhausted failures.
    pub fn display_state(&self) -> &'static str {
        match self.status {
            PostStatus::Failed if self.is_exhausted() => "failed (exhausted)",
            PostStatus::Failed => "failed (retrying)",
            other => other.as_str(),
        }
    }

    pub fn post_data(&self) -> PostData {
        PostData {
            message: self.message.clone(),
            image_url: self.image_url.clone(),
            link: self.link.clone(),
            target_id: None,
        }
    }
}

/// A credentialed connection to a platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialAccount {
    pub id: String,
    pub platform: SocialPlatform,
    pub account_name: String,
    pub external_account_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub is_active: bool,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SocialAccount {
    pub fn new(platform: SocialPlatform, account_name: &str, access_token: &str, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            account_name: account_name.to_string(),
            external_account_id: None,
            access_token: access_token.to_string(),
            refresh_token: None,
            token_expires_at: None,
            is_active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of event recorded in the publish history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Created,
    Updated,
    Deleted,
    Failed,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Deleted => "deleted",
            HistoryAction::Failed => "failed",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "updated" => Ok(HistoryAction::Updated),
            "deleted" => Ok(HistoryAction::Deleted),
            "failed" => Ok(HistoryAction::Failed),
            _ => Err(format!("Invalid history action: '{}'", s)),
        }
    }
}

/// Append-only audit entry, one per dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishAttemptRecord {
    pub id: Option<i64>,
    pub scheduled_post_id: String,
    pub platform: SocialPlatform,
    pub action: HistoryAction,
    pub status: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
}

/// Normalized post payload handed to adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PostData {
    pub message: String,
    pub image_url: Option<String>,
    pub link: Option<String>,
    /// Page or sub-account to publish as, for platforms that have them.
    pub target_id: Option<String>,
}

/// Outcome of one `publish_post` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishResult {
    pub success: bool,
    pub external_post_id: Option<String>,
    pub error: Option<PlatformError>,
    pub response: serde_json::Value,
}

impl PublishResult {
    pub fn published(external_post_id: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            success: true,
            external_post_id: Some(external_post_id.into()),
            error: None,
            response,
        }
    }

    /// Accepted by the platform, but no post id came back.
    pub fn accepted_without_id(response: serde_json::Value) -> Self {
        Self {
            success: true,
            external_post_id: None,
            error: None,
            response,
        }
    }

    pub fn rejected(error: PlatformError, response: serde_json::Value) -> Self {
        Self {
            success: false,
            external_post_id: None,
            error: Some(error),
            response,
        }
    }
}

/// Profile information returned by a platform for an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountInfo {
    pub id: String,
    pub name: String,
    pub platform: SocialPlatform,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
}

/// Tokens issued by an OAuth exchange or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
}

/// Authorization URL plus the values the caller must keep until the callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: Option<String>,
}
