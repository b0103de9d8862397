//! Errors - エラー型と分類
//!
//! ワーカープールが見るのは [`PorterError`] と、その [`ErrorKind`] の 3 分類だけです。
//! 各コンポーネントのエラー（署名・リレー・アップロードなど）は境界で `From` により分類されます。
//! 生の transport エラーがプールまで漏れることはありません。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ErrorKind は実行エラーの運用上の分類
///
/// - Retryable: 一時的なエラー（ネットワーク timeout、ack ゼロ、署名 timeout）
/// - Terminal: 恒久的なエラー（入力不正、リモート署名の明示的な拒否、リトライ上限）
/// - SessionExpired: リモート署名セッションが死んだ。タスクの失敗としては数えない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retryable,
    Terminal,
    SessionExpired,
}

/// PorterError はドメインエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct PorterError {
    kind: ErrorKind,
    message: String,
}

impl PorterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Terminal, message)
    }

    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionExpired, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = PorterError::retryable("relay timeout");
        assert_eq!(err.to_string(), "Retryable: relay timeout");
        assert!(err.is_retryable());
        assert_eq!(err.message(), "relay timeout");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::SessionExpired).unwrap();
        assert_eq!(s, "\"session_expired\"");
    }
}
