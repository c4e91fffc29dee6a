//! Configuration management for Snscast

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::SocialPlatform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// How the retry delay grows with the retry count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Exponential,
}

/// `[scheduling]` section. All durations are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub poll_interval: u64,
    pub max_retries: u32,
    pub retry_delay: u64,
    pub backoff: BackoffStrategy,
    pub max_retry_delay: u64,
    pub publish_timeout: u64,
    pub token_refresh_margin: i64,
    pub batch_size: u32,
    pub concurrency: usize,
    pub stale_after: i64,
    pub rate_limits: HashMap<String, RateLimitConfig>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            max_retries: 3,
            retry_delay: 300,
            backoff: BackoffStrategy::Exponential,
            max_retry_delay: 3600,
            publish_timeout: 30,
            token_refresh_margin: 3600,
            batch_size: 50,
            concurrency: 4,
            stale_after: 900,
            rate_limits: HashMap::new(),
        }
    }
}

/// Slack for database round trips on top of the timed steps of an attempt.
const CLAIM_MARGIN_SECS: i64 = 60;

impl SchedulingConfig {
    /// Longest a live worker can hold a row in `publishing`: content lookup,
    /// token refresh and the publish call each run under `publish_timeout`.
    pub fn max_claim_duration(&self) -> i64 {
        let timeout = i64::try_from(self.publish_timeout).unwrap_or(i64::MAX / 4);
        timeout.saturating_mul(3).saturating_add(CLAIM_MARGIN_SECS)
    }

    /// Posts-per-hour limits keyed by platform name.
    pub fn rate_limit_map(&self) -> HashMap<String, u32> {
        self.rate_limits
            .iter()
            .map(|(platform, limit)| (platform.to_lowercase(), limit.posts_per_hour))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub posts_per_hour: u32,
}

/// `[platforms.*]` sections. A missing section means the platform is disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    pub facebook: Option<OAuthAppConfig>,
    pub instagram: Option<OAuthAppConfig>,
    pub twitter: Option<OAuthAppConfig>,
    pub linkedin: Option<OAuthAppConfig>,
}

/// OAuth application registered with a platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    #[serde(alias = "app_id")]
    pub client_id: Option<String>,
    #[serde(alias = "app_secret")]
    pub client_secret: Option<String>,
}

/// Client credentials after env fallbacks are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl PlatformsConfig {
    pub fn section(&self, platform: SocialPlatform) -> Option<&OAuthAppConfig> {
        match platform {
            SocialPlatform::Facebook => self.facebook.as_ref(),
            SocialPlatform::Instagram => self.instagram.as_ref(),
            SocialPlatform::Twitter => self.twitter.as_ref(),
            SocialPlatform::Linkedin => self.linkedin.as_ref(),
        }
    }

    pub fn is_enabled(&self, platform: SocialPlatform) -> bool {
        self.section(platform).is_some()
    }

    /// Resolve client credentials for an enabled platform.
    ///
    /// Values in the file win; otherwise the platform's environment variables
    /// are used. Instagram publishes through the Facebook app, so it falls
    /// back to the Facebook section and variables.
    pub fn credentials(&self, platform: SocialPlatform) -> Result<AppCredentials> {
        let section = self.section(platform).ok_or_else(|| {
            ConfigError::MissingField(format!("platforms.{}", platform.as_str()))
        })?;

        let fallback = match platform {
            SocialPlatform::Instagram => self.facebook.as_ref(),
            _ => None,
        };

        let (id_var, secret_var) = env_var_names(platform);

        let client_id = section
            .client_id
            .clone()
            .or_else(|| fallback.and_then(|f| f.client_id.clone()))
            .or_else(|| std::env::var(id_var).ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "platforms.{}.client_id (or {})",
                    platform.as_str(),
                    id_var
                ))
            })?;

        let client_secret = section
            .client_secret
            .clone()
            .or_else(|| fallback.and_then(|f| f.client_secret.clone()))
            .or_else(|| std::env::var(secret_var).ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "platforms.{}.client_secret (or {})",
                    platform.as_str(),
                    secret_var
                ))
            })?;

        Ok(AppCredentials {
            client_id,
            client_secret,
        })
    }
}

fn env_var_names(platform: SocialPlatform) -> (&'static str, &'static str) {
    match platform {
        SocialPlatform::Facebook | SocialPlatform::Instagram => {
            ("FACEBOOK_APP_ID", "FACEBOOK_APP_SECRET")
        }
        SocialPlatform::Twitter => ("TWITTER_CLIENT_ID", "TWITTER_CLIENT_SECRET"),
        SocialPlatform::Linkedin => ("LINKEDIN_CLIENT_ID", "LINKEDIN_CLIENT_SECRET"),
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scheduling = &self.scheduling;
        let positive = [
            ("scheduling.poll_interval", scheduling.poll_interval),
            ("scheduling.publish_timeout", scheduling.publish_timeout),
            ("scheduling.batch_size", u64::from(scheduling.batch_size)),
            ("scheduling.concurrency", scheduling.concurrency as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        if scheduling.max_retry_delay < scheduling.retry_delay {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.max_retry_delay".to_string(),
                reason: "must not be smaller than scheduling.retry_delay".to_string(),
            }
            .into());
        }

        if scheduling.token_refresh_margin < 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.token_refresh_margin".to_string(),
                reason: "must not be negative".to_string(),
            }
            .into());
        }

        // A shorter window would let recovery close out rows still being published
        if scheduling.stale_after <= scheduling.max_claim_duration() {
            return Err(ConfigError::InvalidValue {
                field: "scheduling.stale_after".to_string(),
                reason: format!(
                    "must be greater than {} (three publish timeouts plus {}s)",
                    scheduling.max_claim_duration(),
                    CLAIM_MARGIN_SECS
                ),
            }
            .into());
        }

        for platform in scheduling.rate_limits.keys() {
            if platform.parse::<SocialPlatform>().is_err() {
                return Err(ConfigError::InvalidValue {
                    field: format!("scheduling.rate_limits.{}", platform),
                    reason: "unknown platform".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Resolve the configuration file path under the XDG config home
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SNSCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("snscast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnscastError;
    use serial_test::serial;

    const MINIMAL: &str = r#"
[database]
path = "/tmp/snscast-test.db"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.scheduling.poll_interval, 60);
        assert_eq!(config.scheduling.max_retries, 3);
        assert_eq!(config.scheduling.retry_delay, 300);
        assert_eq!(config.scheduling.backoff, BackoffStrategy::Exponential);
        assert_eq!(config.scheduling.token_refresh_margin, 3600);
        assert!(!config.platforms.is_enabled(SocialPlatform::Twitter));
    }

    #[test]
    fn test_full_scheduling_section() {
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[scheduling]
poll_interval = 15
max_retries = 5
retry_delay = 10
backoff = "linear"
max_retry_delay = 120

[scheduling.rate_limits.twitter]
posts_per_hour = 50

[platforms.twitter]
client_id = "cid"
client_secret = "csecret"
"#,
        )
        .unwrap();

        assert_eq!(config.scheduling.poll_interval, 15);
        assert_eq!(config.scheduling.max_retries, 5);
        assert_eq!(config.scheduling.backoff, BackoffStrategy::Linear);
        assert_eq!(config.scheduling.rate_limit_map().get("twitter"), Some(&50));
        assert_eq!(
            config.platforms.credentials(SocialPlatform::Twitter).unwrap(),
            AppCredentials {
                client_id: "cid".to_string(),
                client_secret: "csecret".to_string(),
            }
        );
    }

    #[test]
    fn test_facebook_accepts_app_id_alias() {
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[platforms.facebook]
app_id = "fb-app"
app_secret = "fb-secret"

[platforms.instagram]
"#,
        )
        .unwrap();

        let facebook = config.platforms.credentials(SocialPlatform::Facebook).unwrap();
        assert_eq!(facebook.client_id, "fb-app");

        // Instagram shares the Facebook app
        let instagram = config.platforms.credentials(SocialPlatform::Instagram).unwrap();
        assert_eq!(instagram.client_secret, "fb-secret");
    }

    #[test]
    #[serial]
    fn test_credentials_fall_back_to_env() {
        std::env::set_var("LINKEDIN_CLIENT_ID", "env-id");
        std::env::set_var("LINKEDIN_CLIENT_SECRET", "env-secret");

        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[platforms.linkedin]
"#,
        )
        .unwrap();
        let creds = config.platforms.credentials(SocialPlatform::Linkedin).unwrap();

        std::env::remove_var("LINKEDIN_CLIENT_ID");
        std::env::remove_var("LINKEDIN_CLIENT_SECRET");

        assert_eq!(creds.client_id, "env-id");
        assert_eq!(creds.client_secret, "env-secret");
    }

    #[test]
    #[serial]
    fn test_missing_credentials_is_config_error() {
        std::env::remove_var("TWITTER_CLIENT_ID");
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[platforms.twitter]
client_secret = "only-secret"
"#,
        )
        .unwrap();

        let err = config
            .platforms
            .credentials(SocialPlatform::Twitter)
            .unwrap_err();
        assert!(matches!(err, SnscastError::Config(ConfigError::MissingField(_))));
        assert!(err.to_string().contains("TWITTER_CLIENT_ID"));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let err = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[scheduling]
poll_interval = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scheduling.poll_interval"));
    }

    #[test]
    fn test_rejects_stale_after_within_claim_duration() {
        let err = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[scheduling]
publish_timeout = 5
stale_after = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scheduling.stale_after"));

        // 3 * 5 + 60 is still too short; one second more is enough
        let tight = r#"
[database]
path = "/tmp/x.db"

[scheduling]
publish_timeout = 5
stale_after = 75
"#;
        assert!(Config::from_toml(tight).is_err());
        assert!(Config::from_toml(&tight.replace("75", "76")).is_ok());
    }

    #[test]
    fn test_default_stale_after_outlives_claims() {
        let scheduling = SchedulingConfig::default();
        assert!(scheduling.stale_after > scheduling.max_claim_duration());
    }

    #[test]
    fn test_rejects_unknown_rate_limit_platform() {
        let err = Config::from_toml(
            r#"
[database]
path = "/tmp/x.db"

[scheduling.rate_limits.myspace]
posts_per_hour = 1
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown platform"));
    }

    #[test]
    #[serial]
    fn test_config_path_env_override() {
        std::env::set_var("SNSCAST_CONFIG", "/etc/snscast/custom.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("SNSCAST_CONFIG");
        assert_eq!(path, PathBuf::from("/etc/snscast/custom.toml"));
    }
}
