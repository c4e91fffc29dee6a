//! Publish attempt history
//!
//! Builds the one record written per dispatch attempt and answers history
//! queries. Records are append-only; the table's triggers reject updates and
//! deletes.

use serde_json::Value;

use crate::db::Database;
use crate::error::Result;
use crate::types::{HistoryAction, PublishAttemptRecord, ScheduledPost};

/// Status text stored with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The row will be attempted again
    Retrying,
    /// The row is out of retries or hit a terminal error
    Exhausted,
    /// A worker died mid-publish; the row was closed out
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Retrying => "retrying",
            FailureKind::Exhausted => "exhausted",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

pub struct HistoryRecorder {
    db: Database,
}

impl HistoryRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record for an accepted publish
    pub fn published(post: &ScheduledPost, response: &Value, now: i64) -> PublishAttemptRecord {
        PublishAttemptRecord {
            id: None,
            scheduled_post_id: post.id.clone(),
            platform: post.platform,
            action: HistoryAction::Created,
            status: "published".to_string(),
            response: raw_response(response),
            error: None,
            created_at: now,
        }
    }

    /// Record for a failed attempt
    pub fn failed(
        post: &ScheduledPost,
        kind: FailureKind,
        error: &str,
        response: &Value,
        now: i64,
    ) -> PublishAttemptRecord {
        PublishAttemptRecord {
            id: None,
            scheduled_post_id: post.id.clone(),
            platform: post.platform,
            action: HistoryAction::Failed,
            status: kind.as_str().to_string(),
            response: raw_response(response),
            error: Some(error.to_string()),
            created_at: now,
        }
    }

    /// Append a record outside a ledger transition
    pub async fn append(&self, record: &PublishAttemptRecord) -> Result<i64> {
        self.db.append_attempt(record).await
    }

    /// Every attempt for one post, oldest first
    pub async fn for_post(&self, post_id: &str) -> Result<Vec<PublishAttemptRecord>> {
        self.db.list_attempts(post_id).await
    }

    /// Latest attempts across all posts, newest first
    pub async fn recent(&self, limit: u32) -> Result<Vec<PublishAttemptRecord>> {
        self.db.list_recent_attempts(limit).await
    }
}

fn raw_response(response: &Value) -> Option<String> {
    match response {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentRef, ContentType};
    use crate::types::{PostData, SocialAccount, SocialPlatform};
    use serde_json::json;

    fn post() -> ScheduledPost {
        let account = SocialAccount::new(SocialPlatform::Linkedin, "Brand", "tok", 100);
        ScheduledPost::new_pending(
            ContentRef::new(ContentType::Posts, 7),
            &account,
            PostData {
                message: "hello".to_string(),
                ..Default::default()
            },
            200,
            3,
            100,
        )
    }

    #[test]
    fn test_published_record() {
        let post = post();
        let record = HistoryRecorder::published(&post, &json!({"id": "urn:li:share:1"}), 300);

        assert_eq!(record.scheduled_post_id, post.id);
        assert_eq!(record.action, HistoryAction::Created);
        assert_eq!(record.status, "published");
        assert_eq!(record.response.as_deref(), Some(r#"{"id":"urn:li:share:1"}"#));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failed_record_without_response() {
        let record = HistoryRecorder::failed(
            &post(),
            FailureKind::Interrupted,
            "interrupted",
            &Value::Null,
            300,
        );
        assert_eq!(record.action, HistoryAction::Failed);
        assert_eq!(record.status, "interrupted");
        assert!(record.response.is_none());
        assert_eq!(record.error.as_deref(), Some("interrupted"));
    }
}
