//! Service layer for Snscast
//!
//! `SnscastService` is the entry point used by both binaries. It owns the
//! shared database handle, adapter registry, clock and telemetry, and hands
//! out the sub-services built on them:
//!
//! - `FanOutService`: one content item to many accounts
//! - `Dispatcher`: publishes due rows
//! - `HistoryRecorder`: attempt history
//! - `AccountService`: linking and activating accounts
//!
//! # Example
//!
//! ```no_run
//! use libsnscast::service::SnscastService;
//!
//! # async fn example() -> libsnscast::Result<()> {
//! let service = SnscastService::new().await?;
//! let summary = service.dispatcher().run_once().await?;
//! println!("published {}", summary.published);
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod dispatcher;
pub mod events;
pub mod fanout;
pub mod history;

use std::sync::Arc;
use std::time::Duration;

use self::accounts::AccountService;
use self::dispatcher::{Dispatcher, DispatcherSettings};
use self::events::{Event, EventReceiver, Telemetry};
use self::fanout::FanOutService;
use self::history::HistoryRecorder;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, SchedulingConfig};
use crate::content::ContentSource;
use crate::credentials::CredentialStore;
use crate::db::{Database, PostFilter, QueueStats};
use crate::error::{Result, SnscastError};
use crate::platforms::AdapterRegistry;
use crate::rate_limiter::RateLimiter;
use crate::scheduling::RetryPolicy;
use crate::types::ScheduledPost;

/// Everything a service is assembled from
pub struct ServiceParts {
    pub db: Database,
    pub registry: AdapterRegistry,
    pub clock: Arc<dyn Clock>,
    pub content_source: Option<Arc<dyn ContentSource>>,
    pub scheduling: SchedulingConfig,
    pub telemetry: Telemetry,
}

pub struct SnscastService {
    db: Database,
    clock: Arc<dyn Clock>,
    scheduling: SchedulingConfig,
    telemetry: Telemetry,
    credentials: Arc<CredentialStore>,
    fanout: FanOutService,
    dispatcher: Dispatcher,
    history: HistoryRecorder,
    accounts: AccountService,
}

impl SnscastService {
    /// Create a service from the default configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(&config).await
    }

    /// Open the configured database and build HTTP adapters for every
    /// configured platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, or a
    /// configured platform is missing its client credentials.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let registry = AdapterRegistry::from_config(config)?;

        Ok(Self::from_parts(ServiceParts {
            db,
            registry,
            clock: Arc::new(SystemClock),
            content_source: None,
            scheduling: config.scheduling.clone(),
            telemetry: Telemetry::default(),
        }))
    }

    /// Assemble a service from explicit parts; tests use this with mock
    /// adapters and a manual clock.
    pub fn from_parts(parts: ServiceParts) -> Self {
        let ServiceParts {
            db,
            registry,
            clock,
            content_source,
            scheduling,
            telemetry,
        } = parts;

        let credentials = Arc::new(CredentialStore::new(
            db.clone(),
            registry.clone(),
            clock.clone(),
            scheduling.token_refresh_margin,
            Duration::from_secs(scheduling.publish_timeout),
            telemetry.clone(),
        ));

        let fanout = FanOutService::new(
            db.clone(),
            registry.clone(),
            clock.clone(),
            content_source.clone(),
            scheduling.max_retries,
            telemetry.clone(),
        );

        let dispatcher = Dispatcher::new(
            db.clone(),
            registry.clone(),
            credentials.clone(),
            clock.clone(),
            content_source,
            RateLimiter::from_config(&scheduling.rate_limit_map()),
            RetryPolicy::from_config(&scheduling),
            DispatcherSettings::from_config(&scheduling),
            telemetry.clone(),
        );

        let history = HistoryRecorder::new(db.clone());
        let accounts = AccountService::new(db.clone(), registry, clock.clone());

        Self {
            db,
            clock,
            scheduling,
            telemetry,
            credentials,
            fanout,
            dispatcher,
            history,
            accounts,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn fanout(&self) -> &FanOutService {
        &self.fanout
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Interval between dispatcher ticks, from `[scheduling]`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduling.poll_interval)
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> EventReceiver {
        self.telemetry.events.subscribe()
    }

    pub async fn get_post(&self, post_id: &str) -> Result<ScheduledPost> {
        self.db
            .get_scheduled_post(post_id)
            .await?
            .ok_or_else(|| SnscastError::NotFound(format!("post {}", post_id)))
    }

    pub async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<ScheduledPost>> {
        self.db.list_scheduled_posts(filter).await
    }

    /// Cancel a pending or retry-eligible row.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `InvalidInput` when the row is already
    /// publishing or in a terminal state.
    pub async fn cancel(&self, post_id: &str) -> Result<()> {
        if self.db.cancel_post(post_id, self.clock.now()).await? {
            tracing::info!(post_id = %post_id, "post cancelled");
            self.telemetry.events.emit(Event::PostCancelled {
                post_id: post_id.to_string(),
            });
            return Ok(());
        }

        let post = self.get_post(post_id).await?;
        Err(SnscastError::InvalidInput(format!(
            "post {} is {} and cannot be cancelled",
            post_id,
            post.display_state()
        )))
    }

    /// Move a pending row to another time.
    pub async fn reschedule(&self, post_id: &str, scheduled_at: i64) -> Result<()> {
        if self
            .db
            .reschedule_post(post_id, scheduled_at, self.clock.now())
            .await?
        {
            tracing::info!(post_id = %post_id, scheduled_at, "post rescheduled");
            return Ok(());
        }

        let post = self.get_post(post_id).await?;
        Err(SnscastError::InvalidInput(format!(
            "post {} is {}; only pending posts can be rescheduled",
            post_id,
            post.display_state()
        )))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.db.queue_stats(None).await
    }
}
