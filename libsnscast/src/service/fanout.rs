//! Multi-account fan-out
//!
//! One content item and a set of accounts become one `pending` ledger row
//! per account. Every account is validated on its own: an invalid account is
//! reported back and never affects the rows created for the others.

use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::content::{ContentRef, ContentSource};
use crate::db::{Database, PostFilter, QueueStats};
use crate::error::{Result, SnscastError};
use crate::platforms::AdapterRegistry;
use crate::service::events::{Event, Telemetry};
use crate::types::{PostData, ScheduledPost, SocialAccount};

/// Request to schedule one content item on several accounts
#[derive(Debug, Clone)]
pub struct FanOutRequest {
    pub content: ContentRef,
    pub account_ids: Vec<String>,
    pub template: PostData,
    pub scheduled_at: i64,
}

/// An account that did not get a row
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FanOutFailure {
    pub account_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FanOutResult {
    pub created: Vec<ScheduledPost>,
    pub failed: Vec<FanOutFailure>,
}

impl FanOutResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Aggregated view of every row created for one content item
#[derive(Debug, Clone, Serialize)]
pub struct ContentStatus {
    pub content: ContentRef,
    pub stats: QueueStats,
    pub posts: Vec<ScheduledPost>,
}

pub struct FanOutService {
    db: Database,
    registry: AdapterRegistry,
    clock: Arc<dyn Clock>,
    content_source: Option<Arc<dyn ContentSource>>,
    max_retries: u32,
    telemetry: Telemetry,
}

impl FanOutService {
    pub fn new(
        db: Database,
        registry: AdapterRegistry,
        clock: Arc<dyn Clock>,
        content_source: Option<Arc<dyn ContentSource>>,
        max_retries: u32,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            db,
            registry,
            clock,
            content_source,
            max_retries,
            telemetry,
        }
    }

    /// Create one `pending` row per valid account.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when no account ids are given. Per-account problems
    /// are reported in [`FanOutResult::failed`], not as an error.
    pub async fn schedule(&self, request: FanOutRequest) -> Result<FanOutResult> {
        let mut account_ids: Vec<String> = Vec::with_capacity(request.account_ids.len());
        for id in request.account_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !account_ids.contains(&id) {
                account_ids.push(id);
            }
        }
        if account_ids.is_empty() {
            return Err(SnscastError::InvalidInput(
                "At least one account id is required".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut result = FanOutResult::default();

        for account_id in account_ids {
            let outcome = match self.eligible_account(&account_id, &request.template).await {
                Ok(account) => {
                    let post = ScheduledPost::new_pending(
                        request.content,
                        &account,
                        request.template.clone(),
                        request.scheduled_at,
                        self.max_retries,
                        now,
                    );
                    match self.db.create_scheduled_post(&post).await {
                        Ok(()) => Ok(post),
                        Err(e) => Err(e.to_string()),
                    }
                }
                Err(reason) => Err(reason),
            };

            match outcome {
                Ok(post) => {
                    tracing::info!(
                        post_id = %post.id,
                        account_id = %post.account_id,
                        platform = %post.platform,
                        scheduled_at = post.scheduled_at,
                        "scheduled post"
                    );
                    self.telemetry.events.emit(Event::PostScheduled {
                        post_id: post.id.clone(),
                        account_id: post.account_id.clone(),
                        platform: post.platform.to_string(),
                        scheduled_at: post.scheduled_at,
                    });
                    result.created.push(post);
                }
                Err(error) => {
                    tracing::warn!(account_id = %account_id, error = %error, "account rejected by fan-out");
                    self.telemetry.events.emit(Event::FanOutRejected {
                        account_id: account_id.clone(),
                        error: error.clone(),
                    });
                    result.failed.push(FanOutFailure { account_id, error });
                }
            }
        }

        Ok(result)
    }

    /// Build the template from the CMS, apply overrides, then fan out.
    ///
    /// # Errors
    ///
    /// `NotFound` if no content source is configured or the content is gone.
    pub async fn schedule_from_content(
        &self,
        content: ContentRef,
        account_ids: Vec<String>,
        overrides: PostData,
        scheduled_at: i64,
    ) -> Result<FanOutResult> {
        let source = self
            .content_source
            .as_ref()
            .ok_or_else(|| SnscastError::NotFound("no content source configured".to_string()))?;
        let summary = source
            .lookup(content)
            .await?
            .ok_or_else(|| SnscastError::NotFound(format!("content {}", content)))?;

        self.schedule(FanOutRequest {
            content,
            account_ids,
            template: summary.to_template(&overrides),
            scheduled_at,
        })
        .await
    }

    /// Per-status counts and rows for one content item.
    pub async fn status_for_content(&self, content: ContentRef) -> Result<ContentStatus> {
        let stats = self.db.queue_stats(Some(content)).await?;
        let posts = self
            .db
            .list_scheduled_posts(&PostFilter {
                content: Some(content),
                ..Default::default()
            })
            .await?;

        Ok(ContentStatus {
            content,
            stats,
            posts,
        })
    }

    /// Exists, is active, has an adapter, and the template fits the platform.
    async fn eligible_account(
        &self,
        account_id: &str,
        template: &PostData,
    ) -> std::result::Result<SocialAccount, String> {
        let account = self
            .db
            .get_account(account_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "account not found".to_string())?;

        if !account.is_active {
            return Err("account is inactive".to_string());
        }

        let adapter = self
            .registry
            .get(account.platform)
            .ok_or_else(|| format!("{} is not configured", account.platform))?;

        adapter
            .validate_post(template)
            .map_err(|e| e.to_string())?;

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::content::{ContentSummary, ContentType, InMemoryContentSource};
    use crate::platforms::mock::MockAdapter;
    use crate::types::{PostStatus, SocialPlatform};
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        _temp: TempDir,
        db: Database,
        content: Arc<InMemoryContentSource>,
        service: FanOutService,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("test.db").to_string_lossy())
            .await
            .unwrap();
        let registry = AdapterRegistry::new()
            .with(Arc::new(MockAdapter::new(SocialPlatform::Twitter).with_character_limit(280)))
            .with(Arc::new(MockAdapter::new(SocialPlatform::Instagram).requiring_image()));
        let content = Arc::new(InMemoryContentSource::new());
        let service = FanOutService::new(
            db.clone(),
            registry,
            Arc::new(ManualClock::new(NOW)),
            Some(content.clone() as Arc<dyn ContentSource>),
            3,
            Telemetry::default(),
        );
        Fixture {
            _temp: temp,
            db,
            content,
            service,
        }
    }

    async fn account(db: &Database, platform: SocialPlatform) -> String {
        let account = SocialAccount::new(platform, "brand", "tok", NOW);
        db.create_account(&account).await.unwrap();
        account.id
    }

    fn request(account_ids: Vec<String>, message: &str) -> FanOutRequest {
        FanOutRequest {
            content: ContentRef::new(ContentType::Posts, 42),
            account_ids,
            template: PostData {
                message: message.to_string(),
                ..Default::default()
            },
            scheduled_at: NOW + 3600,
        }
    }

    #[tokio::test]
    async fn test_one_row_per_account() {
        let f = fixture().await;
        let a = account(&f.db, SocialPlatform::Twitter).await;
        let b = account(&f.db, SocialPlatform::Twitter).await;

        let result = f.service.schedule(request(vec![a.clone(), b.clone(), a.clone()], "hi")).await.unwrap();

        assert_eq!(result.created.len(), 2);
        assert!(result.is_complete());
        for post in &result.created {
            assert_eq!(post.status, PostStatus::Pending);
            assert_eq!(post.retry_count, 0);
            assert_eq!(post.max_retries, 3);
        }
    }

    #[tokio::test]
    async fn test_invalid_accounts_do_not_block_valid_ones() {
        let f = fixture().await;
        let twitter = account(&f.db, SocialPlatform::Twitter).await;
        let instagram = account(&f.db, SocialPlatform::Instagram).await;
        let linkedin = account(&f.db, SocialPlatform::Linkedin).await;
        let inactive = account(&f.db, SocialPlatform::Twitter).await;
        f.db.set_account_active(&inactive, false, NOW).await.unwrap();

        let result = f
            .service
            .schedule(request(
                vec![
                    twitter.clone(),
                    instagram.clone(),
                    linkedin.clone(),
                    inactive.clone(),
                    "ghost".to_string(),
                ],
                "text only",
            ))
            .await
            .unwrap();

        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].account_id, twitter);
        assert_eq!(result.failed.len(), 4);

        let reason = |id: &str| {
            result
                .failed
                .iter()
                .find(|f| f.account_id == id)
                .map(|f| f.error.clone())
                .unwrap()
        };
        assert!(reason(&instagram).contains("image_url"));
        assert!(reason(&linkedin).contains("not configured"));
        assert!(reason(&inactive).contains("inactive"));
        assert!(reason("ghost").contains("not found"));

        let rows = f.db.list_scheduled_posts(&PostFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_over_limit_message_rejected() {
        let f = fixture().await;
        let twitter = account(&f.db, SocialPlatform::Twitter).await;

        let result = f
            .service
            .schedule(request(vec![twitter], &"x".repeat(281)))
            .await
            .unwrap();
        assert!(result.created.is_empty());
        assert_eq!(result.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_account_list_is_invalid_input() {
        let f = fixture().await;
        let err = f.service.schedule(request(vec![], "hi")).await.unwrap_err();
        assert!(matches!(err, SnscastError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_schedule_from_content_uses_cms_summary() {
        let f = fixture().await;
        let twitter = account(&f.db, SocialPlatform::Twitter).await;
        let content = ContentRef::new(ContentType::Courses, 9);
        f.content.insert(
            content,
            ContentSummary {
                title: "Spring course".to_string(),
                summary: "Enrolment opens Monday".to_string(),
                image_url: None,
            },
        );

        let result = f
            .service
            .schedule_from_content(content, vec![twitter], PostData::default(), NOW)
            .await
            .unwrap();
        assert_eq!(result.created[0].message, "Spring course\n\nEnrolment opens Monday");
        assert_eq!(result.created[0].content_ref(), content);

        let missing = f
            .service
            .schedule_from_content(ContentRef::new(ContentType::Works, 1), vec!["x".into()], PostData::default(), NOW)
            .await
            .unwrap_err();
        assert!(matches!(missing, SnscastError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_for_content() {
        let f = fixture().await;
        let a = account(&f.db, SocialPlatform::Twitter).await;
        let b = account(&f.db, SocialPlatform::Twitter).await;
        f.service.schedule(request(vec![a, b], "hi")).await.unwrap();

        let status = f
            .service
            .status_for_content(ContentRef::new(ContentType::Posts, 42))
            .await
            .unwrap();
        assert_eq!(status.posts.len(), 2);
        assert_eq!(status.stats.overall.pending, 2);
        assert_eq!(status.stats.overall.in_flight(), 2);
    }
}
