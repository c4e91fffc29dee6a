//! Snscast - scheduled publishing to social networks
//!
//! This library schedules posts for Facebook, Instagram, Twitter/X and
//! LinkedIn accounts, publishes them when they come due, retries transient
//! failures and keeps an append-only history of every attempt.

pub mod clock;
pub mod config;
pub mod content;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod rate_limiter;
pub mod scheduling;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use content::{ContentRef, ContentSource, ContentType};
pub use db::{Database, PostFilter, QueueStats};
pub use error::{Result, SnscastError};
pub use service::SnscastService;
pub use types::{PostData, PostStatus, ScheduledPost, SocialAccount, SocialPlatform};
