//! Telemetry for the publishing pipeline
//!
//! An in-process event bus plus a handful of atomic counters, handed to every
//! component that needs to report something. Nothing here is global: tests
//! build their own [`Telemetry`] and subscribe to it.
//!
//! # Non-Blocking Behavior
//!
//! The bus uses `tokio::sync::broadcast`. If nobody subscribes, events are
//! dropped immediately; lagging subscribers lose the oldest events instead of
//! blocking the dispatcher.
//!
//! # Example
//!
//! ```no_run
//! use libsnscast::service::events::{Event, Telemetry};
//!
//! # async fn example() {
//! let telemetry = Telemetry::new(100);
//! let mut receiver = telemetry.events.subscribe();
//!
//! telemetry.events.emit(Event::PostCancelled {
//!     post_id: "abc123".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus; `capacity` is the per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers. Never blocks.
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Events emitted while scheduling and dispatching posts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Fan-out created a pending row
    PostScheduled {
        post_id: String,
        account_id: String,
        platform: String,
        scheduled_at: i64,
    },

    /// Fan-out refused one account
    FanOutRejected { account_id: String, error: String },

    /// A row was claimed and is about to be published
    PublishStarted {
        post_id: String,
        platform: String,
        attempt: u32,
    },

    PublishSucceeded {
        post_id: String,
        platform: String,
        external_post_id: String,
    },

    PublishFailed {
        post_id: String,
        platform: String,
        error: String,
        /// False when the row is now exhausted
        retryable: bool,
        next_attempt_at: Option<i64>,
    },

    TokenRefreshed {
        account_id: String,
        platform: String,
        expires_at: Option<i64>,
    },

    /// Operator action needed: the account has to be re-linked
    CredentialAlert { account_id: String, reason: String },

    PostCancelled { post_id: String },

    /// A row stuck in `publishing` was closed out
    StaleClaimRecovered { post_id: String },

    DispatchCycleCompleted {
        claimed: usize,
        published: usize,
        retrying: usize,
        exhausted: usize,
        skipped: usize,
        errored: usize,
    },
}

/// Monotonic counters for the dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    cycles: AtomicU64,
    attempts: AtomicU64,
    published: AtomicU64,
    retryable_failures: AtomicU64,
    terminal_failures: AtomicU64,
    token_refreshes: AtomicU64,
    token_refresh_failures: AtomicU64,
    race_losses: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub attempts: u64,
    pub published: u64,
    pub retryable_failures: u64,
    pub terminal_failures: u64,
    pub token_refreshes: u64,
    pub token_refresh_failures: u64,
    pub race_losses: u64,
}

impl DispatchMetrics {
    pub fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self, retryable: bool) {
        if retryable {
            self.retryable_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.terminal_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn token_refresh(&self, ok: bool) {
        if ok {
            self.token_refreshes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.token_refresh_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn race_lost(&self) {
        self.race_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            retryable_failures: self.retryable_failures.load(Ordering::Relaxed),
            terminal_failures: self.terminal_failures.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            token_refresh_failures: self.token_refresh_failures.load(Ordering::Relaxed),
            race_losses: self.race_losses.load(Ordering::Relaxed),
        }
    }
}

/// Observability sink shared by the pipeline components
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub events: EventBus,
    pub metrics: Arc<DispatchMetrics>,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: EventBus::new(capacity),
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(256)
    }
}
