//! sns-queue - Schedule and manage social posts
//!
//! Operator tool for the scheduled post ledger: fan-out, listing, status,
//! cancel, reschedule, history, statistics and account management.

use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use libsnscast::db::StatusCounts;
use libsnscast::logging::LoggingConfig;
use libsnscast::scheduling::parse_schedule;
use libsnscast::service::accounts::{LinkCallback, NewAccount};
use libsnscast::service::fanout::FanOutRequest;
use libsnscast::types::PublishAttemptRecord;
use libsnscast::{
    Config, ContentRef, PostData, PostFilter, PostStatus, ScheduledPost, SnscastError, SnscastService,
    SocialAccount, SocialPlatform,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "sns-queue")]
#[command(version)]
#[command(about = "Schedule and manage social posts")]
#[command(long_about = "\
sns-queue - Schedule and manage social posts

DESCRIPTION:
    sns-queue schedules content for one or more social accounts and lets
    you inspect and manage the resulting queue. Posts are published by the
    sns-send daemon when they come due.

COMMANDS:
    schedule    Schedule a content item on one or more accounts
    list        List scheduled posts
    show        Show one post and its attempt history
    status      Aggregated status for one content item
    cancel      Cancel a pending or retrying post
    reschedule  Move a pending post to a different time
    history     Show recent publish attempts
    stats       Show queue statistics
    accounts    List, add, link, activate or deactivate accounts

USAGE EXAMPLES:
    # Schedule a course announcement on two accounts in two hours
    sns-queue schedule courses:12 --account <ID> --account <ID> \\
        --message \"Enrolment opens Monday\" --at 2h

    # List retrying posts as JSON
    sns-queue list --status failed --format json

    # Aggregated status for a content item
    sns-queue status courses:12

    # Reschedule a post
    sns-queue reschedule <POST_ID> \"tomorrow 3pm\"

CONFIGURATION:
    Configuration file: ~/.config/snscast/config.toml
    Override with SNSCAST_CONFIG.

EXIT CODES:
    0 - Success
    1 - Operation failed (post not found, platform error)
    2 - Database, configuration or credential error
    3 - Invalid input (bad id, time format, state, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule a content item on one or more accounts
    Schedule {
        /// Content reference, TYPE:ID (posts, courses, works)
        content: String,

        /// Account id to publish with (repeatable)
        #[arg(short, long = "account", required = true)]
        accounts: Vec<String>,

        /// Post text
        #[arg(short, long)]
        message: String,

        /// Image URL
        #[arg(long)]
        image: Option<String>,

        /// Link URL
        #[arg(long)]
        link: Option<String>,

        /// When to publish ("now", "2h", "tomorrow 10am", RFC 3339)
        #[arg(long, default_value = "now")]
        at: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List scheduled posts
    List {
        /// Filter by status (pending, publishing, published, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Filter by account id
        #[arg(long)]
        account: Option<String>,

        /// Filter by content reference, TYPE:ID
        #[arg(long)]
        content: Option<String>,

        /// Maximum number of posts
        #[arg(short, long)]
        limit: Option<u32>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one post and its attempt history
    Show {
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Aggregated status for one content item
    Status {
        /// Content reference, TYPE:ID
        content: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a pending or retrying post
    Cancel { post_id: String },

    /// Reschedule a pending post
    Reschedule {
        post_id: String,

        /// New schedule time (e.g., "tomorrow 3pm", "2h")
        time: String,
    },

    /// Show recent publish attempts
    History {
        /// Only attempts for this post
        post_id: Option<String>,

        /// Maximum number of records
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Manage linked accounts
    #[command(subcommand)]
    Accounts(AccountCommands),
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// List accounts
    List {
        /// Filter by platform
        #[arg(short, long)]
        platform: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Add an account with an existing access token
    Add {
        /// Platform (facebook, instagram, twitter, linkedin)
        platform: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Access token
        #[arg(long, env = "SNSCAST_ACCESS_TOKEN", hide_env_values = true)]
        token: String,

        /// Refresh token
        #[arg(long, env = "SNSCAST_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Token expiry ("60d", RFC 3339, ...)
        #[arg(long)]
        expires: Option<String>,

        /// Page, business account or member id on the platform
        #[arg(long)]
        external_id: Option<String>,
    },

    /// Print the authorization URL for linking an account
    LinkUrl {
        platform: String,

        #[arg(long)]
        redirect_uri: String,

        /// Opaque value echoed back by the platform
        #[arg(long)]
        state: String,
    },

    /// Finish linking with the code from the OAuth redirect
    Link {
        platform: String,

        #[arg(long)]
        code: String,

        #[arg(long)]
        redirect_uri: String,

        /// PKCE verifier printed by link-url
        #[arg(long)]
        code_verifier: Option<String>,
    },

    /// Include an account in fan-out and dispatch again
    Activate { account_id: String },

    /// Exclude an account from fan-out and dispatch
    Deactivate { account_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(format: &str) -> libsnscast::Result<Self> {
        match format {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(SnscastError::InvalidInput(format!(
                "Invalid format '{}'. Must be 'text' or 'json'",
                format
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("error", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<SnscastError>()
            .map(SnscastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let service = SnscastService::from_config(&config).await?;

    match cli.command {
        Commands::Schedule {
            content,
            accounts,
            message,
            image,
            link,
            at,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let request = FanOutRequest {
                content: parse_content(&content)?,
                account_ids: accounts,
                template: PostData {
                    message,
                    image_url: image,
                    link,
                    target_id: None,
                },
                scheduled_at: parse_schedule(&at, Utc::now())?.timestamp(),
            };
            cmd_schedule(&service, request, format).await?;
        }
        Commands::List {
            status,
            platform,
            account,
            content,
            limit,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let filter = PostFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                platform: platform.as_deref().map(parse_platform).transpose()?,
                account_id: account,
                content: content.as_deref().map(parse_content).transpose()?,
                limit,
            };
            let posts = service.list_posts(&filter).await?;
            match format {
                OutputFormat::Json => print_json(&posts)?,
                OutputFormat::Text => output_posts_text(&posts),
            }
        }
        Commands::Show { post_id, format } => {
            let format = OutputFormat::parse(&format)?;
            let post = service.get_post(&post_id).await?;
            let attempts = service.history().for_post(&post_id).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "post": post,
                    "state": post.display_state(),
                    "attempts": attempts,
                }))?,
                OutputFormat::Text => {
                    output_post_detail(&post);
                    output_attempts_text(&attempts);
                }
            }
        }
        Commands::Status { content, format } => {
            let format = OutputFormat::parse(&format)?;
            let status = service.fanout().status_for_content(parse_content(&content)?).await?;
            match format {
                OutputFormat::Json => print_json(&status)?,
                OutputFormat::Text => {
                    println!("Content: {}", status.content);
                    output_counts("total", &status.stats.overall);
                    output_posts_text(&status.posts);
                }
            }
        }
        Commands::Cancel { post_id } => {
            service.cancel(&post_id).await?;
            println!("Cancelled post {}", post_id);
        }
        Commands::Reschedule { post_id, time } => {
            let scheduled_at = parse_schedule(&time, Utc::now())?;
            service.reschedule(&post_id, scheduled_at.timestamp()).await?;
            println!("Rescheduled post {} to {}", post_id, scheduled_at.to_rfc3339());
        }
        Commands::History {
            post_id,
            limit,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            let records = match post_id {
                Some(id) => {
                    // Unknown ids are an error, not an empty history
                    service.get_post(&id).await?;
                    service.history().for_post(&id).await?
                }
                None => service.history().recent(limit).await?,
            };
            match format {
                OutputFormat::Json => print_json(&records)?,
                OutputFormat::Text => output_attempts_text(&records),
            }
        }
        Commands::Stats { format } => {
            let format = OutputFormat::parse(&format)?;
            let stats = service.stats().await?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    output_counts("total", &stats.overall);
                    for (platform, counts) in &stats.by_platform {
                        output_counts(platform, counts);
                    }
                    if let Some(next) = stats.next_scheduled_at {
                        println!("next due: {}", format_timestamp(next));
                    }
                }
            }
        }
        Commands::Accounts(command) => cmd_accounts(&service, command).await?,
    }

    Ok(())
}

async fn cmd_schedule(
    service: &SnscastService,
    request: FanOutRequest,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let result = service.fanout().schedule(request).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            for post in &result.created {
                println!(
                    "{} | {} | {} | {}",
                    post.id,
                    post.platform,
                    post.account_id,
                    format_timestamp(post.scheduled_at)
                );
            }
            for failure in &result.failed {
                eprintln!("rejected {}: {}", failure.account_id, failure.error);
            }
        }
    }

    if result.created.is_empty() {
        return Err(SnscastError::InvalidInput("no post was scheduled".to_string()).into());
    }
    Ok(())
}

async fn cmd_accounts(service: &SnscastService, command: AccountCommands) -> anyhow::Result<()> {
    let accounts = service.accounts();

    match command {
        AccountCommands::List { platform, format } => {
            let format = OutputFormat::parse(&format)?;
            let platform = platform.as_deref().map(parse_platform).transpose()?;
            let list = accounts.list(platform).await?;
            match format {
                OutputFormat::Json => print_json(&list)?,
                OutputFormat::Text => output_accounts_text(&list),
            }
        }
        AccountCommands::Add {
            platform,
            name,
            token,
            refresh_token,
            expires,
            external_id,
        } => {
            let token_expires_at = expires
                .as_deref()
                .map(|s| parse_schedule(s, Utc::now()).map(|t| t.timestamp()))
                .transpose()?;
            let account = accounts
                .add(NewAccount {
                    platform: parse_platform(&platform)?,
                    account_name: name,
                    external_account_id: external_id,
                    access_token: token,
                    refresh_token,
                    token_expires_at,
                })
                .await?;
            println!("{}", account.id);
        }
        AccountCommands::LinkUrl {
            platform,
            redirect_uri,
            state,
        } => {
            let request = accounts.begin_link(parse_platform(&platform)?, &redirect_uri, &state)?;
            println!("{}", request.url);
            if let Some(verifier) = request.code_verifier {
                eprintln!("code verifier (pass to `link --code-verifier`): {}", verifier);
            }
        }
        AccountCommands::Link {
            platform,
            code,
            redirect_uri,
            code_verifier,
        } => {
            let account = accounts
                .complete_link(LinkCallback {
                    platform: parse_platform(&platform)?,
                    code,
                    redirect_uri,
                    code_verifier,
                })
                .await?;
            println!("{} | {} | {}", account.id, account.platform, account.account_name);
        }
        AccountCommands::Activate { account_id } => {
            accounts.activate(&account_id).await?;
            println!("Activated account {}", account_id);
        }
        AccountCommands::Deactivate { account_id } => {
            accounts.deactivate(&account_id).await?;
            println!("Deactivated account {}", account_id);
        }
    }

    Ok(())
}

fn parse_content(input: &str) -> libsnscast::Result<ContentRef> {
    input.parse().map_err(SnscastError::InvalidInput)
}

fn parse_platform(input: &str) -> libsnscast::Result<SocialPlatform> {
    input.parse().map_err(SnscastError::InvalidInput)
}

fn parse_status(input: &str) -> libsnscast::Result<PostStatus> {
    input.parse().map_err(SnscastError::InvalidInput)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn output_posts_text(posts: &[ScheduledPost]) {
    let now = Utc::now().timestamp();

    for post in posts {
        println!(
            "{} | {} | {} | {} | {}",
            post.id,
            post.platform,
            post.display_state(),
            format_time_until(now, post.scheduled_at),
            truncate_content(&post.message, 50)
        );
    }
}

fn output_post_detail(post: &ScheduledPost) {
    println!("id:           {}", post.id);
    println!("content:      {}", post.content_ref());
    println!("platform:     {}", post.platform);
    println!("account:      {}", post.account_id);
    println!("state:        {}", post.display_state());
    println!("scheduled:    {}", format_timestamp(post.scheduled_at));
    println!("retries:      {}/{}", post.retry_count, post.max_retries);
    if let Some(next) = post.next_attempt_at {
        println!("next attempt: {}", format_timestamp(next));
    }
    if let Some(id) = &post.external_post_id {
        println!("external id:  {}", id);
    }
    if let Some(error) = &post.error {
        println!("error:        {}", error);
    }
    println!("message:      {}", post.message);
}

fn output_attempts_text(records: &[PublishAttemptRecord]) {
    for record in records {
        println!(
            "{} | {} | {} | {} | {}",
            format_timestamp(record.created_at),
            record.scheduled_post_id,
            record.platform,
            record.status,
            record.error.as_deref().unwrap_or("-")
        );
    }
}

fn output_accounts_text(accounts: &[SocialAccount]) {
    for account in accounts {
        println!(
            "{} | {} | {} | {}",
            account.id,
            account.platform,
            account.account_name,
            if account.is_active { "active" } else { "inactive" }
        );
    }
}

fn output_counts(label: &str, counts: &StatusCounts) {
    println!(
        "{}: {} total, {} pending, {} publishing, {} published, {} retrying, {} exhausted, {} cancelled",
        label,
        counts.total(),
        counts.pending,
        counts.publishing,
        counts.published,
        counts.retrying,
        counts.exhausted,
        counts.cancelled
    );
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt: DateTime<Utc>| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() <= max_chars && line.len() == content.len() {
        line.to_string()
    } else {
        format!("{}...", line.chars().take(max_chars).collect::<String>())
    }
}

/// Format time until scheduled time in human-readable format
fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;

    if diff < 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
