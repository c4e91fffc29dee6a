//! Database operations for Snscast
//!
//! Every ledger transition is a conditional `UPDATE ... WHERE status = ?`.
//! A caller owns a transition only when exactly one row was affected; zero
//! rows means another worker (or an operator cancel) got there first.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::content::{ContentRef, ContentType};
use crate::error::{DbError, Result};
use crate::types::{
    HistoryAction, PostStatus, PublishAttemptRecord, ScheduledPost, SocialAccount, SocialPlatform,
    TokenGrant,
};

const POST_COLUMNS: &str = "id, content_type, content_id, platform, account_id, message, \
     image_url, link, scheduled_at, status, published_at, external_post_id, error, \
     retry_count, max_retries, next_attempt_at, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, platform, account_name, external_account_id, access_token, \
     refresh_token, token_expires_at, is_active, last_synced_at, created_at, updated_at";

const ATTEMPT_COLUMNS: &str =
    "id, scheduled_post_id, platform, action, status, response, error, created_at";

/// How a claimed (`publishing`) row leaves that state.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptTransition {
    /// `publishing -> published`
    Published { external_post_id: String },
    /// `publishing -> failed`, eligible again at `next_attempt_at`
    Retry {
        error: String,
        next_attempt_at: i64,
    },
    /// `publishing -> failed` with the retry budget forced to exhausted
    Exhausted { error: String },
}

/// Filters for listing scheduled posts
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub platform: Option<SocialPlatform>,
    pub account_id: Option<String>,
    pub content: Option<ContentRef>,
    pub limit: Option<u32>,
}

/// Row counts per lifecycle state, with failures split by retry eligibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub publishing: u64,
    pub published: u64,
    pub retrying: u64,
    pub exhausted: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.publishing + self.published + self.retrying + self.exhausted + self.cancelled
    }

    /// Rows that will still see a dispatch attempt.
    pub fn in_flight(&self) -> u64 {
        self.pending + self.publishing + self.retrying
    }

    fn add(&mut self, status: PostStatus, exhausted: bool, count: u64) {
        match status {
            PostStatus::Pending => self.pending += count,
            PostStatus::Publishing => self.publishing += count,
            PostStatus::Published => self.published += count,
            PostStatus::Failed if exhausted => self.exhausted += count,
            PostStatus::Failed => self.retrying += count,
            PostStatus::Cancelled => self.cancelled += count,
        }
    }
}

/// Aggregate view of the ledger
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueueStats {
    pub overall: StatusCounts,
    pub by_platform: BTreeMap<String, StatusCounts>,
    pub next_scheduled_at: Option<i64>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Social accounts
    // ------------------------------------------------------------------

    pub async fn create_account(&self, account: &SocialAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO social_accounts (id, platform, account_name, external_account_id,
                access_token, refresh_token, token_expires_at, is_active, last_synced_at,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(account.platform.as_str())
        .bind(&account.account_name)
        .bind(&account.external_account_id)
        .bind(&account.access_token)
        .bind(&account.refresh_token)
        .bind(account.token_expires_at)
        .bind(account.is_active)
        .bind(account.last_synced_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<SocialAccount>> {
        let query = format!("SELECT {} FROM social_accounts WHERE id = ?", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn list_accounts(&self, platform: Option<SocialPlatform>) -> Result<Vec<SocialAccount>> {
        let query = format!(
            "SELECT {} FROM social_accounts WHERE (? IS NULL OR platform = ?) ORDER BY platform, account_name",
            ACCOUNT_COLUMNS
        );
        let platform = platform.map(|p| p.as_str());
        let rows = sqlx::query(&query)
            .bind(platform)
            .bind(platform)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_account).collect()
    }

    /// Returns false when the account does not exist
    pub async fn set_account_active(&self, account_id: &str, active: bool, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE social_accounts SET is_active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist refreshed credentials in one statement.
    ///
    /// A grant without a refresh token keeps the stored one.
    pub async fn update_account_tokens(&self, account_id: &str, grant: &TokenGrant, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE social_accounts
            SET access_token = ?,
                refresh_token = COALESCE(?, refresh_token),
                token_expires_at = ?,
                last_synced_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&grant.access_token)
        .bind(&grant.refresh_token)
        .bind(grant.expires_at)
        .bind(now)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Scheduled posts
    // ------------------------------------------------------------------

    pub async fn create_scheduled_post(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (id, content_type, content_id, platform, account_id,
                message, image_url, link, scheduled_at, status, published_at, external_post_id,
                error, retry_count, max_retries, next_attempt_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(post.content_type.as_str())
        .bind(post.content_id)
        .bind(post.platform.as_str())
        .bind(&post.account_id)
        .bind(&post.message)
        .bind(&post.image_url)
        .bind(&post.link)
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.published_at)
        .bind(&post.external_post_id)
        .bind(&post.error)
        .bind(i64::from(post.retry_count))
        .bind(i64::from(post.max_retries))
        .bind(post.next_attempt_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_scheduled_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let query = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    pub async fn list_scheduled_posts(&self, filter: &PostFilter) -> Result<Vec<ScheduledPost>> {
        let mut where_clauses = vec!["1=1"];

        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }
        if filter.account_id.is_some() {
            where_clauses.push("account_id = ?");
        }
        if filter.content.is_some() {
            where_clauses.push("content_type = ? AND content_id = ?");
        }

        let query_str = format!(
            "SELECT {} FROM scheduled_posts WHERE {} ORDER BY scheduled_at ASC, created_at ASC LIMIT ?",
            POST_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);

        // Bind parameters in the same order as WHERE clauses
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        if let Some(account_id) = &filter.account_id {
            query = query.bind(account_id.clone());
        }
        if let Some(content) = filter.content {
            query = query.bind(content.content_type.as_str()).bind(content.content_id);
        }
        query = query.bind(filter.limit.map(i64::from).unwrap_or(-1));

        let rows = query.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;
        rows.iter().map(row_to_post).collect()
    }

    /// Rows a dispatch cycle should try to claim, oldest first.
    pub async fn list_due_posts(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE (status = 'pending' AND scheduled_at <= ?)
               OR (status = 'failed' AND retry_count < max_retries
                   AND COALESCE(next_attempt_at, scheduled_at) <= ?)
            ORDER BY COALESCE(next_attempt_at, scheduled_at) ASC, created_at ASC
            LIMIT ?
            "#,
            POST_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// `pending|failed -> publishing`, keyed on the state the caller observed.
    ///
    /// Re-checks due-ness and retry eligibility in the same statement, so a
    /// cancel or a competing claim between selection and claim wins.
    pub async fn claim_for_publishing(&self, post: &ScheduledPost, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', updated_at = ?
            WHERE id = ?
              AND status = ?
              AND retry_count = ?
              AND (
                    (status = 'pending' AND scheduled_at <= ?)
                 OR (status = 'failed' AND retry_count < max_retries
                     AND COALESCE(next_attempt_at, scheduled_at) <= ?)
              )
            "#,
        )
        .bind(now)
        .bind(&post.id)
        .bind(post.status.as_str())
        .bind(i64::from(post.retry_count))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a claimed row out of `publishing` and append its history record,
    /// in one transaction. Returns false (and writes nothing) if the row was
    /// no longer `publishing`.
    pub async fn finish_attempt(
        &self,
        post_id: &str,
        transition: &AttemptTransition,
        record: &PublishAttemptRecord,
        now: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let result = match transition {
            AttemptTransition::Published { external_post_id } => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_posts
                    SET status = 'published', external_post_id = ?, published_at = ?,
                        error = NULL, next_attempt_at = NULL, updated_at = ?
                    WHERE id = ? AND status = 'publishing'
                    "#,
                )
                .bind(external_post_id)
                .bind(now)
                .bind(now)
                .bind(post_id)
                .execute(&mut *tx)
                .await
            }
            AttemptTransition::Retry {
                error,
                next_attempt_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_posts
                    SET status = 'failed', error = ?,
                        retry_count = MIN(retry_count + 1, max_retries),
                        next_attempt_at = ?, updated_at = ?
                    WHERE id = ? AND status = 'publishing'
                    "#,
                )
                .bind(error)
                .bind(next_attempt_at)
                .bind(now)
                .bind(post_id)
                .execute(&mut *tx)
                .await
            }
            AttemptTransition::Exhausted { error } => {
                sqlx::query(
                    r#"
                    UPDATE scheduled_posts
                    SET status = 'failed', error = ?, retry_count = max_retries,
                        next_attempt_at = NULL, updated_at = ?
                    WHERE id = ? AND status = 'publishing'
                    "#,
                )
                .bind(error)
                .bind(now)
                .bind(post_id)
                .execute(&mut *tx)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() != 1 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        insert_attempt(&mut *tx, record).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    /// Operator cancel. Only pending rows and failed rows that are still
    /// retry-eligible can be cancelled.
    pub async fn cancel_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'cancelled', next_attempt_at = NULL, updated_at = ?
            WHERE id = ?
              AND (status = 'pending' OR (status = 'failed' AND retry_count < max_retries))
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a pending row to a new time
    pub async fn reschedule_post(&self, post_id: &str, scheduled_at: i64, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(scheduled_at)
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Rows stuck in `publishing` since before `cutoff`.
    pub async fn list_stale_publishing(&self, cutoff: i64) -> Result<Vec<ScheduledPost>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts WHERE status = 'publishing' AND updated_at < ? ORDER BY updated_at",
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub async fn append_attempt(&self, record: &PublishAttemptRecord) -> Result<i64> {
        insert_attempt(&self.pool, record).await
    }

    pub async fn list_attempts(&self, post_id: &str) -> Result<Vec<PublishAttemptRecord>> {
        let query = format!(
            "SELECT {} FROM publish_attempts WHERE scheduled_post_id = ? ORDER BY id ASC",
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn list_recent_attempts(&self, limit: u32) -> Result<Vec<PublishAttemptRecord>> {
        let query = format!(
            "SELECT {} FROM publish_attempts ORDER BY id DESC LIMIT ?",
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn count_attempts(&self, post_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM publish_attempts WHERE scheduled_post_id = ?")
                .bind(post_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::SqlxError)?;

        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Status counts, optionally restricted to one content item
    pub async fn queue_stats(&self, content: Option<ContentRef>) -> Result<QueueStats> {
        let content_type = content.map(|c| c.content_type.as_str());
        let content_id = content.map(|c| c.content_id);

        let rows = sqlx::query(
            r#"
            SELECT platform, status, retry_count >= max_retries AS exhausted, COUNT(*) AS n
            FROM scheduled_posts
            WHERE (? IS NULL OR (content_type = ? AND content_id = ?))
            GROUP BY platform, status, exhausted
            "#,
        )
        .bind(content_type)
        .bind(content_type)
        .bind(content_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let platform: String = row.try_get("platform").map_err(DbError::SqlxError)?;
            let status = parse_column::<PostStatus>(row, "status")?;
            let exhausted: i64 = row.try_get("exhausted").map_err(DbError::SqlxError)?;
            let exhausted = exhausted != 0;
            let count: i64 = row.try_get("n").map_err(DbError::SqlxError)?;

            stats.overall.add(status, exhausted, count as u64);
            stats
                .by_platform
                .entry(platform)
                .or_default()
                .add(status, exhausted, count as u64);
        }

        stats.next_scheduled_at = sqlx::query_scalar(
            r#"
            SELECT MIN(scheduled_at) FROM scheduled_posts
            WHERE status = 'pending' AND (? IS NULL OR (content_type = ? AND content_id = ?))
            "#,
        )
        .bind(content_type)
        .bind(content_type)
        .bind(content_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(stats)
    }
}

async fn insert_attempt<'e, E>(executor: E, record: &PublishAttemptRecord) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO publish_attempts (scheduled_post_id, platform, action, status, response, error, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.scheduled_post_id)
    .bind(record.platform.as_str())
    .bind(record.action.as_str())
    .bind(&record.status)
    .bind(&record.response)
    .bind(&record.error)
    .bind(record.created_at)
    .execute(executor)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(result.last_insert_rowid())
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column).map_err(DbError::SqlxError)?;
    raw.parse::<T>()
        .map_err(|e| DbError::InvalidData(format!("{}: {}", column, e)).into())
}

fn get_u32(row: &SqliteRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column).map_err(DbError::SqlxError)?;
    u32::try_from(raw).map_err(|_| DbError::InvalidData(format!("{}: {} out of range", column, raw)).into())
}

fn row_to_post(r: &SqliteRow) -> Result<ScheduledPost> {
    Ok(ScheduledPost {
        id: r.try_get("id").map_err(DbError::SqlxError)?,
        content_type: parse_column::<ContentType>(r, "content_type")?,
        content_id: r.try_get("content_id").map_err(DbError::SqlxError)?,
        platform: parse_column::<SocialPlatform>(r, "platform")?,
        account_id: r.try_get("account_id").map_err(DbError::SqlxError)?,
        message: r.try_get("message").map_err(DbError::SqlxError)?,
        image_url: r.try_get("image_url").map_err(DbError::SqlxError)?,
        link: r.try_get("link").map_err(DbError::SqlxError)?,
        scheduled_at: r.try_get("scheduled_at").map_err(DbError::SqlxError)?,
        status: parse_column::<PostStatus>(r, "status")?,
        published_at: r.try_get("published_at").map_err(DbError::SqlxError)?,
        external_post_id: r.try_get("external_post_id").map_err(DbError::SqlxError)?,
        error: r.try_get("error").map_err(DbError::SqlxError)?,
        retry_count: get_u32(r, "retry_count")?,
        max_retries: get_u32(r, "max_retries")?,
        next_attempt_at: r.try_get("next_attempt_at").map_err(DbError::SqlxError)?,
        created_at: r.try_get("created_at").map_err(DbError::SqlxError)?,
        updated_at: r.try_get("updated_at").map_err(DbError::SqlxError)?,
    })
}

fn row_to_account(r: &SqliteRow) -> Result<SocialAccount> {
    Ok(SocialAccount {
        id: r.try_get("id").map_err(DbError::SqlxError)?,
        platform: parse_column::<SocialPlatform>(r, "platform")?,
        account_name: r.try_get("account_name").map_err(DbError::SqlxError)?,
        external_account_id: r.try_get("external_account_id").map_err(DbError::SqlxError)?,
        access_token: r.try_get("access_token").map_err(DbError::SqlxError)?,
        refresh_token: r.try_get("refresh_token").map_err(DbError::SqlxError)?,
        token_expires_at: r.try_get("token_expires_at").map_err(DbError::SqlxError)?,
        is_active: r.try_get("is_active").map_err(DbError::SqlxError)?,
        last_synced_at: r.try_get("last_synced_at").map_err(DbError::SqlxError)?,
        created_at: r.try_get("created_at").map_err(DbError::SqlxError)?,
        updated_at: r.try_get("updated_at").map_err(DbError::SqlxError)?,
    })
}

fn row_to_attempt(r: &SqliteRow) -> Result<PublishAttemptRecord> {
    Ok(PublishAttemptRecord {
        id: r.try_get("id").map_err(DbError::SqlxError)?,
        scheduled_post_id: r.try_get("scheduled_post_id").map_err(DbError::SqlxError)?,
        platform: parse_column::<SocialPlatform>(r, "platform")?,
        action: parse_column::<HistoryAction>(r, "action")?,
        status: r.try_get("status").map_err(DbError::SqlxError)?,
        response: r.try_get("response").map_err(DbError::SqlxError)?,
        error: r.try_get("error").map_err(DbError::SqlxError)?,
        created_at: r.try_get("created_at").map_err(DbError::SqlxError)?,
    })
}
