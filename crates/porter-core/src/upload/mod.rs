//! Upload: Blossom authorization headers, their verification, and the HTTP client.
//!
//! ```text
//! bytes --sha256--> UploadAuthorizer (kind 24242, signed) --"Nostr <b64>"--> PUT /upload
//! ```

pub mod authorizer;
pub mod blossom;
pub mod mime;
pub mod verify;

use thiserror::Error;

use crate::domain::PorterError;
use crate::ports::media_source::is_retryable_status;
use crate::signer::SignError;

pub use authorizer::{AUTH_SCHEME, UploadAuthorizer};
pub use blossom::BlossomClient;
pub use mime::detect_mime;
pub use verify::{AuthError, verify_authorization};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("upload timed out")]
    Timeout,

    #[error("upload transport error: {0}")]
    Transport(String),

    #[error("uploaded blob hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid upload response: {0}")]
    InvalidResponse(String),

    #[error("invalid upload endpoint url: {0}")]
    InvalidUrl(String),

    #[error("upload authorization failed: {0}")]
    Authorization(#[from] SignError),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Timeout
        } else if let Some(status) = err.status() {
            UploadError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            UploadError::InvalidResponse(err.to_string())
        } else {
            UploadError::Transport(err.to_string())
        }
    }
}

impl From<UploadError> for PorterError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Authorization(sign) => PorterError::from(sign),
            UploadError::Http { status, .. } if is_retryable_status(status) => {
                PorterError::retryable(err.to_string())
            }
            // 401 / 403 / 413 / 415 ... 同じリクエストは同じ結果になる
            UploadError::Http { .. } | UploadError::InvalidUrl(_) => {
                PorterError::terminal(err.to_string())
            }
            UploadError::Timeout
            | UploadError::Transport(_)
            | UploadError::HashMismatch { .. }
            | UploadError::InvalidResponse(_) => PorterError::retryable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use rstest::rstest;

    fn http(status: u16) -> UploadError {
        UploadError::Http {
            status,
            message: String::new(),
        }
    }

    #[rstest]
    #[case::server_error(http(502), ErrorKind::Retryable)]
    #[case::rate_limited(http(429), ErrorKind::Retryable)]
    #[case::unauthorized(http(401), ErrorKind::Terminal)]
    #[case::too_large(http(413), ErrorKind::Terminal)]
    #[case::timeout(UploadError::Timeout, ErrorKind::Retryable)]
    #[case::hash(UploadError::HashMismatch { expected: "a".into(), actual: "b".into() }, ErrorKind::Retryable)]
    #[case::sign_timeout(UploadError::Authorization(SignError::Timeout), ErrorKind::Retryable)]
    #[case::sign_rejected(UploadError::Authorization(SignError::Rejected("no".into())), ErrorKind::Terminal)]
    #[case::session(UploadError::Authorization(SignError::SessionExpired("ttl".into())), ErrorKind::SessionExpired)]
    fn upload_errors_are_classified(#[case] err: UploadError, #[case] kind: ErrorKind) {
        assert_eq!(PorterError::from(err).kind(), kind);
    }
}
