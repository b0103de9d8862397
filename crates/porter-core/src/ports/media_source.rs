//! MediaSource port - 移行元メディアの取得

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::PorterError;

/// Raw media as downloaded from the source platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("fetch {0} timed out")]
    Timeout(String),

    #[error("fetch {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{0} returned an empty body")]
    Empty(String),
}

/// 404 / 410 などはメディア自体が消えている。何度やっても同じなので terminal
impl From<FetchError> for PorterError {
    fn from(err: FetchError) -> Self {
        match &err {
            FetchError::Http { status, .. } if is_retryable_status(*status) => {
                PorterError::retryable(err.to_string())
            }
            FetchError::Http { .. } | FetchError::Empty(_) => PorterError::terminal(err.to_string()),
            FetchError::Timeout(_) | FetchError::Transport { .. } => {
                PorterError::retryable(err.to_string())
            }
        }
    }
}

/// 5xx, 408, 429 は一時的
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(404, ErrorKind::Terminal)]
    #[case(410, ErrorKind::Terminal)]
    #[case(429, ErrorKind::Retryable)]
    #[case(503, ErrorKind::Retryable)]
    fn http_status_classification(#[case] status: u16, #[case] kind: ErrorKind) {
        let err = FetchError::Http {
            url: "https://cdn.example/1.jpg".into(),
            status,
        };
        assert_eq!(PorterError::from(err).kind(), kind);
    }
}
