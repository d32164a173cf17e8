//! Tracing subscriber installation.
//!
//! `RUST_LOG` takes precedence over [`LogConfig::level`] when set, so a host
//! application can narrow output to a single component
//! (e.g. `RUST_LOG=rtms.signaling=trace`).

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter for a configuration.
///
/// Disabled logging maps to the `off` directive instead of skipping
/// installation, so a later call cannot silently re-enable output.
#[must_use]
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    if !config.enabled {
        return EnvFilter::new("off");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Install the global tracing subscriber.
///
/// Returns `false` if a subscriber was already installed (by an earlier call
/// or by the host application); that is not an error.
pub fn init(config: &LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Progressive => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    result.is_ok()
}
