//! Scheduling and retry timing
//!
//! Parses the human-readable schedule strings accepted by the CLI and
//! computes retry backoff for failed publish attempts.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::config::{BackoffStrategy, SchedulingConfig};
use crate::error::{Result, SnscastError};

/// Parse a schedule string relative to `now`.
///
/// Supports:
/// - `now`
/// - Absolute times: RFC 3339 (`2025-11-20T15:00:00+09:00`) or
///   `2025-11-20 15:00` (UTC)
/// - Relative durations: `30m`, `2h`, `1 day`
/// - Natural language: `tomorrow`, `tomorrow 10am`, `next monday 9:00`
///
/// Past instants are accepted: the dispatcher picks them up on its next tick.
///
/// # Errors
///
/// Returns `InvalidInput` if the string matches none of the formats.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(SnscastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Some(duration) = parse_duration(input) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        SnscastError::InvalidInput(format!("Could not parse schedule '{}': {}", input, e))
    })
}

/// Parse a duration string like "1h" or "30 minutes"
fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::try_seconds(i64::try_from(std_duration.as_secs()).ok()?)
}

/// Backoff between attempts of a failed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    /// Delay after the first failure, in seconds
    pub base_delay: u64,
    /// Upper bound on any computed delay, in seconds
    pub max_delay: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulingConfig) -> Self {
        Self {
            strategy: config.backoff,
            base_delay: config.retry_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Seconds to wait after the attempt that brought the row to
    /// `retry_count` (1-based), never less than a platform `Retry-After`.
    pub fn delay_for(&self, retry_count: u32, retry_after: Option<u64>) -> u64 {
        let step = retry_count.max(1);
        let computed = match self.strategy {
            BackoffStrategy::Linear => self.base_delay.saturating_mul(u64::from(step)),
            BackoffStrategy::Exponential => {
                let factor = 2u64.checked_pow(step - 1).unwrap_or(u64::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        let capped = computed.min(self.max_delay);
        capped.max(retry_after.unwrap_or(0))
    }

    /// Instant at which the next attempt may run.
    pub fn next_attempt_at(&self, now: i64, retry_count: u32, retry_after: Option<u64>) -> i64 {
        let delay = i64::try_from(self.delay_for(retry_count, retry_after)).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default())
    }
}
