//! Common utilities and types shared across the RTMS client crates.

#![warn(clippy::pedantic)]

/// Module for common identifier types
pub mod types;

/// Module for logging configuration loaded from the environment
pub mod config;

/// Module for tracing subscriber installation
pub mod logging;

/// Module for secret types that prevent accidental logging
pub mod secret;
