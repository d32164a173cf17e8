//! Logging configuration shared by every RTMS component.
//!
//! Values come from `ZM_RTMS_LOG_LEVEL`, `ZM_RTMS_LOG_FORMAT` and
//! `ZM_RTMS_LOG_ENABLED`. Unrecognized values keep the default rather than
//! failing, so a typo in a log setting never prevents a join.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

/// Environment variable selecting the minimum log level.
pub const LOG_LEVEL_VAR: &str = "ZM_RTMS_LOG_LEVEL";

/// Environment variable selecting the output format.
pub const LOG_FORMAT_VAR: &str = "ZM_RTMS_LOG_FORMAT";

/// Environment variable that disables logging when set to `false`.
pub const LOG_ENABLED_VAR: &str = "ZM_RTMS_LOG_ENABLED";

/// Minimum level of emitted log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Output format of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output for consoles.
    Progressive,
    /// One JSON object per record for log processors.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level (default: debug)
    pub level: LogLevel,
    /// Output format (default: progressive)
    pub format: LogFormat,
    /// Whether logging is enabled at all
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Progressive,
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Load logging configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(&env::vars().collect())
    }

    /// Load logging configuration from a `HashMap` (for testing).
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = vars.get(LOG_LEVEL_VAR).and_then(|v| LogLevel::parse(v)) {
            config.level = level;
        }

        if let Some(format) = vars.get(LOG_FORMAT_VAR) {
            match format.to_ascii_lowercase().as_str() {
                "json" => config.format = LogFormat::Json,
                "progressive" => config.format = LogFormat::Progressive,
                _ => {}
            }
        }

        if let Some(enabled) = vars.get(LOG_ENABLED_VAR) {
            config.enabled = !enabled.eq_ignore_ascii_case("false");
        }

        config
    }
}
