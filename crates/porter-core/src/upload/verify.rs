//! Verifier side of the upload authorization (what a conforming Blossom server checks).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::authorizer::AUTH_SCHEME;
use crate::event::{EventError, Kind, SignedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization scheme must be {AUTH_SCHEME}")]
    Scheme,

    #[error("authorization is not valid base64")]
    Encoding,

    #[error("authorization event is invalid: {0}")]
    Event(#[from] EventError),

    #[error("authorization event has kind {0}, expected 24242")]
    WrongKind(Kind),

    #[error("authorization is not for an upload")]
    WrongAction,

    #[error("authorization is for blob {actual}, not {expected}")]
    HashMismatch { expected: String, actual: String },

    #[error("authorization has no expiration")]
    MissingExpiration,

    #[error("authorization created in the future ({created_at} > {now})")]
    NotYetValid { created_at: u64, now: u64 },

    #[error("authorization expired at {expiration} (now {now})")]
    Expired { expiration: u64, now: u64 },
}

/// Check an `Authorization` header value at instant `now`.
///
/// Valid while `created_at <= now < expiration`.
pub fn verify_authorization(
    header: &str,
    expected_sha256: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SignedEvent, AuthError> {
    let encoded = header
        .strip_prefix(AUTH_SCHEME)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or(AuthError::Scheme)?;
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::Encoding)?;
    let json = String::from_utf8(raw).map_err(|_| AuthError::Encoding)?;

    let event = SignedEvent::from_json(&json)?;
    event.verify()?;

    if event.kind != Kind::BLOB_AUTH {
        return Err(AuthError::WrongKind(event.kind));
    }
    if event.tag_value("t") != Some("upload") {
        return Err(AuthError::WrongAction);
    }
    if let Some(expected) = expected_sha256 {
        let actual = event.tag_value("x").unwrap_or_default();
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AuthError::HashMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    let now = now.timestamp().max(0) as u64;
    let expiration: u64 = event
        .tag_value("expiration")
        .and_then(|v| v.parse().ok())
        .ok_or(AuthError::MissingExpiration)?;
    if event.created_at > now {
        return Err(AuthError::NotYetValid {
            created_at: event.created_at,
            now,
        });
    }
    if now >= expiration {
        return Err(AuthError::Expired { expiration, now });
    }
    Ok(event)
}
