//! Handshake signature generation.
//!
//! The signature is `hex(HMAC-SHA256(secret, "{client},{meeting_uuid},{stream_id}"))`.
//! It is recomputed for every join and never cached.

use crate::config::{Config, JoinParams};
use crate::errors::RtmsError;
use common::secret::{is_blank, ExposeSecret, SecretString};
use ring::hmac;

/// Compute the handshake signature.
///
/// # Errors
///
/// Returns `RtmsError::MissingCredential` if the client ID or the secret is
/// blank.
pub fn generate_signature(
    client_id: &str,
    secret: &SecretString,
    meeting_uuid: &str,
    stream_id: &str,
) -> Result<String, RtmsError> {
    if client_id.trim().is_empty() {
        return Err(RtmsError::MissingCredential("client ID"));
    }
    if is_blank(secret) {
        return Err(RtmsError::MissingCredential("client secret"));
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.expose_secret().as_bytes());
    let message = format!("{client_id},{meeting_uuid},{stream_id}");
    let tag = hmac::sign(&key, message.as_bytes());

    Ok(hex::encode(tag.as_ref()))
}

/// Signature to send for `params`.
///
/// An explicit non-blank signature wins. Otherwise credentials come from the
/// join parameters first, then from `config`.
///
/// # Errors
///
/// Returns `RtmsError::MissingCredential` if no usable client ID or secret
/// resolves.
pub fn resolve_signature(params: &JoinParams, config: &Config) -> Result<String, RtmsError> {
    if let Some(signature) = params.signature.as_deref() {
        if !signature.trim().is_empty() {
            return Ok(signature.to_string());
        }
    }

    let client_id = params
        .client
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .or(config.client.as_deref())
        .ok_or(RtmsError::MissingCredential("client ID"))?;

    let secret = params
        .secret
        .as_ref()
        .filter(|s| !is_blank(s))
        .or(config.secret.as_ref())
        .ok_or(RtmsError::MissingCredential("client secret"))?;

    // Sign exactly the identifiers the handshake will carry
    generate_signature(
        client_id,
        secret,
        params.meeting_uuid.trim(),
        params.rtms_stream_id.trim(),
    )
}
