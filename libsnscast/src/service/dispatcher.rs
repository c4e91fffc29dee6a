//! Dispatcher: publishes due posts
//!
//! Each cycle selects due rows, claims them with a conditional UPDATE, loads
//! a valid token, calls the platform adapter under a timeout and moves the
//! row out of `publishing` together with its history record.
//!
//! Once a row is claimed, every path ends in exactly one
//! [`Database::finish_attempt`] call, so each attempt leaves exactly one
//! history record. Rows are processed independently; an error on one row is
//! turned into a failed attempt for that row and never aborts the batch.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::content::ContentSource;
use crate::credentials::CredentialStore;
use crate::db::{AttemptTransition, Database};
use crate::error::{PlatformError, Result, SnscastError};
use crate::platforms::AdapterRegistry;
use crate::rate_limiter::RateLimiter;
use crate::scheduling::RetryPolicy;
use crate::service::events::{Event, Telemetry};
use crate::service::history::{FailureKind, HistoryRecorder};
use crate::types::{PublishResult, ScheduledPost};

/// How long rate-limit windows are kept
const RATE_WINDOW_RETENTION_SECS: i64 = 24 * 3600;

/// Dispatcher tuning, usually taken from `[scheduling]`
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub batch_size: u32,
    pub concurrency: usize,
    pub publish_timeout: Duration,
    /// Seconds a row may stay in `publishing` before it is considered orphaned
    pub stale_after: i64,
}

impl DispatcherSettings {
    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            publish_timeout: Duration::from_secs(config.publish_timeout),
            stale_after: config.stale_after,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default())
    }
}

/// Counts for one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Rows this cycle won the claim for
    pub claimed: usize,
    pub published: usize,
    /// Failed, will be attempted again
    pub retrying: usize,
    /// Failed for good, including recovered stale claims
    pub exhausted: usize,
    /// Due rows left alone: claim lost, local rate limit, or already finished
    pub skipped: usize,
    /// Rows whose processing hit an internal error
    pub errored: usize,
}

impl DispatchSummary {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Published => {
                self.claimed += 1;
                self.published += 1;
            }
            Outcome::Retrying => {
                self.claimed += 1;
                self.retrying += 1;
            }
            Outcome::Exhausted => {
                self.claimed += 1;
                self.exhausted += 1;
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Errored => self.errored += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Retrying,
    Exhausted,
    Skipped,
    Errored,
}

/// Result of one attempt, before it is written to the ledger
#[derive(Debug)]
enum Verdict {
    Published {
        external_post_id: String,
        response: Value,
    },
    Failed {
        error: String,
        retryable: bool,
        retry_after: Option<u64>,
        response: Value,
        /// The platform refused the access token
        revoked: bool,
    },
}

impl Verdict {
    fn terminal(error: impl Into<String>) -> Self {
        Verdict::Failed {
            error: error.into(),
            retryable: false,
            retry_after: None,
            response: Value::Null,
            revoked: false,
        }
    }

    fn retryable(error: impl Into<String>) -> Self {
        Verdict::Failed {
            error: error.into(),
            retryable: true,
            retry_after: None,
            response: Value::Null,
            revoked: false,
        }
    }

    fn from_platform_error(error: PlatformError, response: Value) -> Self {
        Verdict::Failed {
            retryable: error.is_retryable(),
            retry_after: error.retry_after(),
            revoked: matches!(error, PlatformError::Authentication(_)),
            error: error.to_string(),
            response,
        }
    }

    fn from_result(result: PublishResult) -> Self {
        if result.success {
            return match result.external_post_id {
                Some(external_post_id) => Verdict::Published {
                    external_post_id,
                    response: result.response,
                },
                // It may be live; another attempt risks a duplicate
                None => Verdict::Failed {
                    error: "platform accepted the post but returned no post id".to_string(),
                    retryable: false,
                    retry_after: None,
                    response: result.response,
                    revoked: false,
                },
            };
        }

        let error = result
            .error
            .unwrap_or_else(|| PlatformError::Posting("platform rejected the post".to_string()));
        Verdict::from_platform_error(error, result.response)
    }
}

pub struct Dispatcher {
    db: Database,
    registry: AdapterRegistry,
    credentials: Arc<CredentialStore>,
    clock: Arc<dyn Clock>,
    content_source: Option<Arc<dyn ContentSource>>,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
    settings: DispatcherSettings,
    telemetry: Telemetry,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        registry: AdapterRegistry,
        credentials: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
        content_source: Option<Arc<dyn ContentSource>>,
        rate_limiter: RateLimiter,
        retry: RetryPolicy,
        settings: DispatcherSettings,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            db,
            registry,
            credentials,
            clock,
            content_source,
            rate_limiter,
            retry,
            settings,
            telemetry,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Run one dispatch cycle.
    ///
    /// # Errors
    ///
    /// Only failures to read the ledger abort the cycle; per-row errors are
    /// counted in [`DispatchSummary::errored`].
    pub async fn run_once(&self) -> Result<DispatchSummary> {
        let now = self.clock.now();
        let mut summary = DispatchSummary {
            exhausted: self.recover_stale(now).await?,
            ..Default::default()
        };

        let due = self.db.list_due_posts(now, self.settings.batch_size).await?;
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "due posts selected");
        }

        let outcomes: Vec<Outcome> = stream::iter(due)
            .map(|post| self.process(post))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            summary.add(outcome);
        }

        if let Err(e) = self
            .rate_limiter
            .prune(&self.db, now - RATE_WINDOW_RETENTION_SECS)
            .await
        {
            tracing::warn!(error = %e, "could not prune rate limit windows");
        }

        self.telemetry.metrics.cycle();
        self.telemetry.events.emit(Event::DispatchCycleCompleted {
            claimed: summary.claimed,
            published: summary.published,
            retrying: summary.retrying,
            exhausted: summary.exhausted,
            skipped: summary.skipped,
            errored: summary.errored,
        });
        if summary != DispatchSummary::default() {
            tracing::info!(
                claimed = summary.claimed,
                published = summary.published,
                retrying = summary.retrying,
                exhausted = summary.exhausted,
                skipped = summary.skipped,
                errored = summary.errored,
                "dispatch cycle completed"
            );
        }

        Ok(summary)
    }

    /// Run cycles every `poll_interval` until `shutdown` turns true.
    ///
    /// A cycle in progress always completes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, poll_interval: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "dispatch cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    // Sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("dispatcher stopped");
        Ok(())
    }

    /// Close out rows left in `publishing` by a worker that died.
    ///
    /// They become exhausted rather than retried: the remote call may have
    /// gone through.
    async fn recover_stale(&self, now: i64) -> Result<usize> {
        let stale = self
            .db
            .list_stale_publishing(now - self.settings.stale_after)
            .await?;

        let mut recovered = 0;
        for post in stale {
            let error = "interrupted: publishing did not complete";
            let record = HistoryRecorder::failed(&post, FailureKind::Interrupted, error, &Value::Null, now);
            let transition = AttemptTransition::Exhausted {
                error: error.to_string(),
            };

            if self.db.finish_attempt(&post.id, &transition, &record, now).await? {
                tracing::warn!(
                    post_id = %post.id,
                    platform = %post.platform,
                    "recovered stale publishing claim"
                );
                self.telemetry.metrics.failed(false);
                self.telemetry.events.emit(Event::StaleClaimRecovered {
                    post_id: post.id.clone(),
                });
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn process(&self, post: ScheduledPost) -> Outcome {
        let post_id = post.id.clone();
        match self.claim_and_publish(post).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(post_id = %post_id, error = %e, "failed to process post");
                Outcome::Errored
            }
        }
    }

    async fn claim_and_publish(&self, post: ScheduledPost) -> Result<Outcome> {
        let now = self.clock.now();

        if !self.rate_limiter.try_reserve(&self.db, post.platform, now).await? {
            tracing::debug!(
                post_id = %post.id,
                platform = %post.platform,
                "local rate limit reached, leaving post for a later cycle"
            );
            return Ok(Outcome::Skipped);
        }

        let claimed = match self.db.claim_for_publishing(&post, now).await {
            Ok(claimed) => claimed,
            Err(e) => {
                self.release_slot(&post, now).await;
                return Err(e);
            }
        };
        if !claimed {
            tracing::debug!(post_id = %post.id, "claim lost");
            self.telemetry.metrics.race_lost();
            self.release_slot(&post, now).await;
            return Ok(Outcome::Skipped);
        }

        let attempt = post.retry_count + 1;
        tracing::info!(
            post_id = %post.id,
            account_id = %post.account_id,
            platform = %post.platform,
            retry_count = post.retry_count,
            "publishing post"
        );
        self.telemetry.metrics.attempt();
        self.telemetry.events.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            platform: post.platform.to_string(),
            attempt,
        });

        let verdict = match self.attempt(&post).await {
            Ok(verdict) => verdict,
            Err(e) => Verdict::retryable(e.to_string()),
        };

        self.finish(&post, verdict).await
    }

    async fn release_slot(&self, post: &ScheduledPost, reserved_at: i64) {
        if let Err(e) = self.rate_limiter.release(&self.db, post.platform, reserved_at).await {
            tracing::warn!(post_id = %post.id, error = %e, "could not release rate limit slot");
        }
    }

    /// Everything between the claim and the ledger write.
    async fn attempt(&self, post: &ScheduledPost) -> Result<Verdict> {
        if let Some(source) = &self.content_source {
            match tokio::time::timeout(self.settings.publish_timeout, source.lookup(post.content_ref())).await {
                Err(_) => return Ok(Verdict::retryable("content lookup timed out")),
                Ok(lookup) => {
                    if lookup?.is_none() {
                        return Ok(Verdict::terminal("content deleted"));
                    }
                }
            }
        }

        let account = match self.db.get_account(&post.account_id).await? {
            Some(account) if account.is_active => account,
            _ => return Ok(Verdict::terminal("account deactivated")),
        };

        let token = match self.credentials.get_valid_token(&account.id).await {
            Ok(token) => token,
            Err(SnscastError::Credential(e)) => return Ok(Verdict::terminal(e.to_string())),
            Err(e) => return Err(e),
        };

        let Some(adapter) = self.registry.get(post.platform) else {
            return Ok(Verdict::terminal(format!("{} is not configured", post.platform)));
        };

        let mut data = post.post_data();
        data.target_id = account.external_account_id.clone();

        let verdict = match tokio::time::timeout(
            self.settings.publish_timeout,
            adapter.publish_post(&token, &data),
        )
        .await
        {
            Err(_) => Verdict::retryable(format!(
                "publish timed out after {}s",
                self.settings.publish_timeout.as_secs_f64()
            )),
            Ok(Err(SnscastError::Platform(e))) => Verdict::from_platform_error(e, Value::Null),
            Ok(Err(e)) => Verdict::retryable(e.to_string()),
            Ok(Ok(result)) => Verdict::from_result(result),
        };

        // A revoked token on publish needs the same operator action as a
        // failed refresh
        if let Verdict::Failed {
            error,
            revoked: true,
            ..
        } = &verdict
        {
            tracing::warn!(account_id = %account.id, error = %error, "platform refused the access token");
            self.telemetry.events.emit(Event::CredentialAlert {
                account_id: account.id.clone(),
                reason: error.clone(),
            });
        }

        Ok(verdict)
    }

    /// Write the verdict and its history record in one transaction.
    async fn finish(&self, post: &ScheduledPost, verdict: Verdict) -> Result<Outcome> {
        let now = self.clock.now();

        match verdict {
            Verdict::Published {
                external_post_id,
                response,
            } => {
                let record = HistoryRecorder::published(post, &response, now);
                let transition = AttemptTransition::Published {
                    external_post_id: external_post_id.clone(),
                };
                if !self.db.finish_attempt(&post.id, &transition, &record, now).await? {
                    tracing::warn!(post_id = %post.id, "row left publishing before the result was stored");
                    return Ok(Outcome::Skipped);
                }

                tracing::info!(
                    post_id = %post.id,
                    platform = %post.platform,
                    external_post_id = %external_post_id,
                    "post published"
                );
                self.telemetry.metrics.published();
                self.telemetry.events.emit(Event::PublishSucceeded {
                    post_id: post.id.clone(),
                    platform: post.platform.to_string(),
                    external_post_id,
                });
                Ok(Outcome::Published)
            }
            Verdict::Failed {
                error,
                retryable,
                retry_after,
                response,
                ..
            } => {
                let retry_count = post.retry_count + 1;
                let will_retry = retryable && retry_count < post.max_retries;

                let (transition, kind, next_attempt_at) = if will_retry {
                    let next = self.retry.next_attempt_at(now, retry_count, retry_after);
                    (
                        AttemptTransition::Retry {
                            error: error.clone(),
                            next_attempt_at: next,
                        },
                        FailureKind::Retrying,
                        Some(next),
                    )
                } else {
                    (
                        AttemptTransition::Exhausted {
                            error: error.clone(),
                        },
                        FailureKind::Exhausted,
                        None,
                    )
                };

                let record = HistoryRecorder::failed(post, kind, &error, &response, now);
                if !self.db.finish_attempt(&post.id, &transition, &record, now).await? {
                    tracing::warn!(post_id = %post.id, "row left publishing before the result was stored");
                    return Ok(Outcome::Skipped);
                }

                if will_retry {
                    tracing::warn!(
                        post_id = %post.id,
                        platform = %post.platform,
                        retry_count = retry_count,
                        next_attempt_at = ?next_attempt_at,
                        error = %error,
                        "publish failed, will retry"
                    );
                } else {
                    tracing::error!(
                        post_id = %post.id,
                        platform = %post.platform,
                        retry_count = retry_count,
                        error = %error,
                        "publish failed permanently"
                    );
                }
                self.telemetry.metrics.failed(will_retry);
                self.telemetry.events.emit(Event::PublishFailed {
                    post_id: post.id.clone(),
                    platform: post.platform.to_string(),
                    error,
                    retryable: will_retry,
                    next_attempt_at,
                });

                Ok(if will_retry {
                    Outcome::Retrying
                } else {
                    Outcome::Exhausted
                })
            }
        }
    }
}
