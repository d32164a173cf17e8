//! Secret types for protecting credentials from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the RTMS client secret. A
//! `SecretString` prints as `[REDACTED]` through `Debug`, so a join
//! configuration can derive or implement `Debug` and still be safe to pass to
//! `tracing` fields. The value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     client_id: String,
//!     client_secret: SecretString,
//! }
//!
//! let creds = Credentials {
//!     client_id: "my-app".to_string(),
//!     client_secret: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("s3cr3t"));
//!
//! // Reading the value is always an explicit call
//! let key: &str = creds.client_secret.expose_secret();
//! assert_eq!(key, "s3cr3t");
//! ```
//!
//! Use `SecretString` for the OAuth client secret and for any environment
//! value that keys the handshake signature. The signature itself is derived
//! per session and is not long-lived, but it is still never logged.

pub use secrecy::{ExposeSecret, SecretString};

/// Returns `true` if the secret is empty or whitespace only.
///
/// Credential resolution treats such values as absent.
#[must_use]
pub fn is_blank(secret: &SecretString) -> bool {
    secret.expose_secret().trim().is_empty()
}
