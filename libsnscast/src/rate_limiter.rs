//! Local per-platform publish budget
//!
//! Counts claimed publish attempts in hourly windows stored in the
//! `rate_limits` table. A slot is reserved before the claim and handed back
//! when the claim is lost. A platform without a configured limit is never throttled.

use std::collections::HashMap;

use crate::db::Database;
use crate::error::{DbError, Result};
use crate::types::SocialPlatform;

const WINDOW_SECS: i64 = 3600;

/// Posts-per-hour budget keyed by platform
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    limits: HashMap<SocialPlatform, u32>,
}

impl RateLimiter {
    pub fn new(limits: HashMap<SocialPlatform, u32>) -> Self {
        Self { limits }
    }

    /// Build from `[scheduling.rate_limits]`; unknown platform names are
    /// rejected earlier by config validation and skipped here.
    pub fn from_config(limits: &HashMap<String, u32>) -> Self {
        Self::new(
            limits
                .iter()
                .filter_map(|(name, limit)| name.parse().ok().map(|p| (p, *limit)))
                .collect(),
        )
    }

    pub fn limit_for(&self, platform: SocialPlatform) -> Option<u32> {
        self.limits.get(&platform).copied()
    }

    /// Take one slot in the current window, or report that none is left.
    ///
    /// The check and the increment are a single statement, so concurrent
    /// workers can never push a window past its limit.
    pub async fn try_reserve(&self, db: &Database, platform: SocialPlatform, now: i64) -> Result<bool> {
        let Some(limit) = self.limit_for(platform) else {
            return Ok(true);
        };
        if limit == 0 {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO rate_limits (platform, window_start, post_count)
            VALUES (?, ?, 1)
            ON CONFLICT(platform, window_start)
            DO UPDATE SET post_count = post_count + 1
            WHERE rate_limits.post_count < ?
            "#,
        )
        .bind(platform.as_str())
        .bind(window_start(now))
        .bind(i64::from(limit))
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Hand back a slot taken by [`try_reserve`](Self::try_reserve) for an
    /// attempt that never happened.
    pub async fn release(&self, db: &Database, platform: SocialPlatform, now: i64) -> Result<()> {
        if self.limit_for(platform).is_none() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE rate_limits SET post_count = post_count - 1
            WHERE platform = ? AND window_start = ? AND post_count > 0
            "#,
        )
        .bind(platform.as_str())
        .bind(window_start(now))
        .execute(db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Drop windows that ended before `cutoff`
    pub async fn prune(&self, db: &Database, cutoff: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE window_start < ?")
            .bind(window_start(cutoff))
            .execute(db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }
}

fn window_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(WINDOW_SECS) * WINDOW_SECS
}
