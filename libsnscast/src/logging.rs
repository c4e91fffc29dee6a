//! Logging setup shared by `sns-send` and `sns-queue`
//!
//! Logs always go to stderr so command output on stdout stays parseable.
//! The format comes from `SNSCAST_LOG_FORMAT` (`text`, `json`, `pretty`) and
//! the level from `SNSCAST_LOG_LEVEL`; `RUST_LOG` overrides both filters.
//!
//! ```no_run
//! use libsnscast::logging::{LoggingConfig, LogFormat};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Our own crates, which `--verbose` turns up to debug.
const OWN_TARGETS: [&str; 3] = ["libsnscast", "sns_send", "sns_queue"];

/// Chatty dependencies kept at warn unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: [&str; 4] = ["sqlx", "hyper", "hyper_util", "reqwest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines, suitable for journald and pipes
    Text,
    /// One JSON object per event
    Json,
    /// Multi-line with colors
    Pretty,
}

impl LogFormat {
    const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted)
            .ok_or_else(|| format!("unknown log format '{}' (expected text, json or pretty)", s))
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Read `SNSCAST_LOG_FORMAT` and `SNSCAST_LOG_LEVEL`. An unparseable
    /// format falls back to text rather than failing startup.
    pub fn from_env(default_level: &str, verbose: bool) -> Self {
        let format = match std::env::var("SNSCAST_LOG_FORMAT") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                eprintln!("warning: {}, using text", e);
                LogFormat::Text
            }),
            Err(_) => LogFormat::Text,
        };

        let level = std::env::var("SNSCAST_LOG_LEVEL")
            .ok()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_level.to_string());

        Self::new(format, level, verbose)
    }

    /// Filter used when `RUST_LOG` is unset.
    fn directives(&self) -> String {
        let own_level = if self.verbose { "debug" } else { self.level.as_str() };

        let mut parts = vec![self.level.clone()];
        parts.extend(OWN_TARGETS.iter().map(|t| format!("{}={}", t, own_level)));
        parts.extend(QUIET_TARGETS.iter().map(|t| format!("{}=warn", t)));
        parts.join(",")
    }

    /// Install the global subscriber. Returns false when one was already
    /// installed (tests, embedding applications).
    pub fn init(&self) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.directives()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => builder.pretty().with_file(true).with_line_number(true).try_init(),
            LogFormat::Text => builder.with_target(false).with_ansi(false).try_init(),
        };
        installed.is_ok()
    }
}
