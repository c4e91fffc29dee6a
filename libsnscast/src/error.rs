//! Error types for Snscast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnscastError>;

#[derive(Error, Debug)]
pub enum SnscastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl SnscastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SnscastError::InvalidInput(_) => 3,
            SnscastError::Platform(PlatformError::Authentication(_)) => 2,
            SnscastError::Credential(_) => 2,
            SnscastError::Config(_) => 2,
            SnscastError::Database(_) => 2,
            SnscastError::Platform(_) => 1,
            SnscastError::NotFound(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// Errors reported by platform adapters.
///
/// Adapters hand most of these back inside a `PublishResult` rather than as
/// `Err`; only `Network` and `MalformedResponse` travel as transport errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Missing required field for {platform}: {field}")]
    MissingRequiredField { platform: String, field: String },

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Not supported: {0}")]
    NotImplemented(String),
}

impl PlatformError {
    /// Whether a dispatch attempt that ended with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_)
                | PlatformError::RateLimit { .. }
                | PlatformError::Posting(_)
                | PlatformError::MalformedResponse(_)
        )
    }

    /// Retry-after hint in seconds, when the platform supplied one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            PlatformError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("Credentials for account {account_id} expired: {reason}")]
    Expired { account_id: String, reason: String },

    #[error("Social account not found: {0}")]
    AccountNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SnscastError::InvalidInput("Empty message".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = SnscastError::Platform(PlatformError::Authentication("bad token".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_credential_error() {
        let error = SnscastError::Credential(CredentialError::Expired {
            account_id: "acc-1".to_string(),
            reason: "refresh token revoked".to_string(),
        });
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_posting_error() {
        let error = SnscastError::Platform(PlatformError::Posting("rejected".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let error = SnscastError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(error.exit_code(), 2);

        let error = SnscastError::Database(DbError::InvalidData("status 'bogus'".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_not_found() {
        let error = SnscastError::NotFound("post abc".to_string());
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting_missing_field() {
        let error = SnscastError::Platform(PlatformError::MissingRequiredField {
            platform: "instagram".to_string(),
            field: "image_url".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Platform error: Missing required field for instagram: image_url"
        );
    }

    #[test]
    fn test_error_message_formatting_rate_limit() {
        let error = PlatformError::RateLimit {
            message: "too many requests".to_string(),
            retry_after: Some(60),
        };
        assert_eq!(error.to_string(), "Rate limit exceeded: too many requests");
        assert_eq!(error.retry_after(), Some(60));
    }

    #[test]
    fn test_error_message_formatting_credential() {
        let error = CredentialError::Expired {
            account_id: "acc-1".to_string(),
            reason: "refresh not supported".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Credentials for account acc-1 expired: refresh not supported"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PlatformError::Network("reset".to_string()).is_retryable());
        assert!(PlatformError::Posting("500".to_string()).is_retryable());
        assert!(PlatformError::MalformedResponse("not json".to_string()).is_retryable());
        assert!(PlatformError::RateLimit {
            message: "slow down".to_string(),
            retry_after: None
        }
        .is_retryable());

        assert!(!PlatformError::Authentication("revoked".to_string()).is_retryable());
        assert!(!PlatformError::Validation("too long".to_string()).is_retryable());
        assert!(!PlatformError::NotImplemented("video".to_string()).is_retryable());
        assert!(!PlatformError::MissingRequiredField {
            platform: "instagram".to_string(),
            field: "image_url".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_conversion_from_credential_error() {
        let error: SnscastError = CredentialError::AccountNotFound("acc-9".to_string()).into();
        match error {
            SnscastError::Credential(CredentialError::AccountNotFound(id)) => {
                assert_eq!(id, "acc-9");
            }
            _ => panic!("Expected SnscastError::Credential"),
        }
    }
}
