//! RTMS client configuration.
//!
//! Process-wide defaults are loaded from environment variables; per-join
//! values come from [`JoinParams`] and override them. Sensitive fields are
//! redacted in Debug output.

use common::secret::SecretString;
use rtms_protocol::signaling::{AudioParams, DeskshareParams, MediaParams, VideoParams};
use rtms_protocol::{MediaKind, MediaTypes};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client ID used when a join does not supply one.
pub const CLIENT_VAR: &str = "ZM_RTMS_CLIENT";

/// Client secret used when a join does not supply one.
pub const SECRET_VAR: &str = "ZM_RTMS_SECRET";

/// CA bundle path for TLS verification.
pub const CA_VAR: &str = "ZM_RTMS_CA";

pub const JOIN_TIMEOUT_VAR: &str = "ZM_RTMS_JOIN_TIMEOUT_MS";
pub const POLL_INTERVAL_VAR: &str = "ZM_RTMS_POLL_INTERVAL_MS";
pub const KEEPALIVE_TIMEOUT_VAR: &str = "ZM_RTMS_KEEPALIVE_TIMEOUT_MS";
pub const INTERRUPTION_TIMEOUT_VAR: &str = "ZM_RTMS_INTERRUPTION_TIMEOUT_MS";

/// Default deadline for connect and for the handshake response.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;

/// Default poll driver cadence.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default silence allowed from the server before a liveness fault.
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 60_000;

/// Default time a stream may stay interrupted before it is torn down.
pub const DEFAULT_INTERRUPTION_TIMEOUT_MS: u64 = 30_000;

/// Smallest tick the poll driver will use. A configured interval of 0 maps here.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Well-known system CA bundle locations, checked in order.
pub const SYSTEM_CA_PATHS: [&str; 7] = [
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/tls/cacert.pem",
    "/etc/ssl/cert.pem",
    "/usr/local/etc/openssl/cert.pem",
    "/opt/homebrew/etc/openssl/cert.pem",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Process-wide client configuration.
#[derive(Clone)]
pub struct Config {
    /// Default client ID (`ZM_RTMS_CLIENT`).
    pub client: Option<String>,

    /// Default client secret (`ZM_RTMS_SECRET`).
    /// Protected by `SecretString` to prevent accidental logging.
    pub secret: Option<SecretString>,

    /// CA bundle path (`ZM_RTMS_CA`).
    pub ca_path: Option<PathBuf>,

    /// Connect and handshake deadline (default: 10s).
    pub join_timeout: Duration,

    /// Poll driver cadence (default: 10ms).
    pub poll_interval: Duration,

    /// Inbound silence tolerated before a liveness fault (default: 60s).
    pub keepalive_timeout: Duration,

    /// Time allowed in INTERRUPTED before teardown (default: 30s).
    pub interruption_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: None,
            secret: None,
            ca_path: None,
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            keepalive_timeout: Duration::from_millis(DEFAULT_KEEPALIVE_TIMEOUT_MS),
            interruption_timeout: Duration::from_millis(DEFAULT_INTERRUPTION_TIMEOUT_MS),
        }
    }
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client", &self.client)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("ca_path", &self.ca_path)
            .field("join_timeout", &self.join_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("keepalive_timeout", &self.keepalive_timeout)
            .field("interruption_timeout", &self.interruption_timeout)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a timing variable is not a
    /// non-negative integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a timing variable is not a
    /// non-negative integer.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Config {
            client: non_empty(CLIENT_VAR),
            secret: non_empty(SECRET_VAR).map(SecretString::from),
            ca_path: non_empty(CA_VAR).map(PathBuf::from),
            join_timeout: parse_millis(vars, JOIN_TIMEOUT_VAR, DEFAULT_JOIN_TIMEOUT_MS)?,
            poll_interval: parse_millis(vars, POLL_INTERVAL_VAR, DEFAULT_POLL_INTERVAL_MS)?,
            keepalive_timeout: parse_millis(
                vars,
                KEEPALIVE_TIMEOUT_VAR,
                DEFAULT_KEEPALIVE_TIMEOUT_MS,
            )?,
            interruption_timeout: parse_millis(
                vars,
                INTERRUPTION_TIMEOUT_VAR,
                DEFAULT_INTERRUPTION_TIMEOUT_MS,
            )?,
        })
    }
}

fn parse_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(Duration::from_millis(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(format!("{key}={raw}: {e}"))),
    }
}

/// Find the CA bundle to trust.
///
/// Order: `explicit`, then the configured path, then [`SYSTEM_CA_PATHS`].
/// Returns `None` when nothing exists on disk.
#[must_use]
pub fn discover_ca(explicit: Option<&Path>, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit.or(configured) {
        return Some(path.to_path_buf());
    }
    SYSTEM_CA_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
}

/// Parameters for one join.
///
/// Only `meeting_uuid`, `rtms_stream_id` and `server_urls` are required.
/// Every `None` falls back to [`Config`]; an explicit `signature` skips
/// signature generation entirely.
#[derive(Clone, Default)]
pub struct JoinParams {
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    /// Comma-separated candidate URLs, tried in order.
    pub server_urls: String,
    pub signature: Option<String>,
    pub client: Option<String>,
    pub secret: Option<SecretString>,
    pub ca: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    /// Skip the background poll driver; the host calls `Client::poll`.
    pub manual_poll: bool,
}

impl fmt::Debug for JoinParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinParams")
            .field("meeting_uuid", &self.meeting_uuid)
            .field("rtms_stream_id", &self.rtms_stream_id)
            .field("server_urls", &self.server_urls)
            .field("signature", &self.signature.as_ref().map(|_| "[REDACTED]"))
            .field("client", &self.client)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("ca", &self.ca)
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("manual_poll", &self.manual_poll)
            .finish()
    }
}

impl JoinParams {
    #[must_use]
    pub fn new(
        meeting_uuid: impl Into<String>,
        rtms_stream_id: impl Into<String>,
        server_urls: impl Into<String>,
    ) -> Self {
        Self {
            meeting_uuid: meeting_uuid.into(),
            rtms_stream_id: rtms_stream_id.into(),
            server_urls: server_urls.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(SecretString::from(secret.into()));
        self
    }

    #[must_use]
    pub fn with_ca(mut self, ca: impl Into<PathBuf>) -> Self {
        self.ca = Some(ca.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    #[must_use]
    pub fn with_manual_poll(mut self) -> Self {
        self.manual_poll = true;
        self
    }

    /// Split `server_urls` into the ordered candidate list.
    #[must_use]
    pub fn candidate_urls(&self) -> Vec<String> {
        self.server_urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Media negotiated in the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConfig {
    pub types: MediaTypes,
    pub params: MediaParams,
}

impl MediaConfig {
    /// Enable one media kind.
    pub fn enable(&mut self, kind: MediaKind) {
        self.types = self.types.with(kind);
    }

    pub fn set_audio(&mut self, params: AudioParams) {
        self.params.audio = Some(params);
    }

    pub fn set_video(&mut self, params: VideoParams) {
        self.params.video = Some(params);
    }

    pub fn set_deskshare(&mut self, params: DeskshareParams) {
        self.params.deskshare = Some(params);
    }
}
