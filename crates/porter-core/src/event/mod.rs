//! Events: canonical form, signing, verification and the builders.
//!
//! ビルダーは純粋関数。I/O も時計も持たず、`now` は呼び出し側から渡します。

pub mod builder;
pub mod kind;
pub mod signed;
pub mod tag;
pub mod timestamp;
pub mod unsigned;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::domain::PorterError;

pub use builder::{Article, EventBuilder, PostInput};
pub use kind::Kind;
pub use signed::SignedEvent;
pub use tag::Tag;
pub use unsigned::UnsignedEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("post has no uploaded media")]
    NoMedia,

    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),

    #[error("article has no identifier")]
    MissingIdentifier,

    #[error("article body is empty")]
    EmptyArticle,

    #[error("authorization window of {0}s overflows the expiration time")]
    WindowOverflow(u64),

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("event author {actual} does not match expected {expected}")]
    AuthorMismatch { expected: String, actual: String },

    #[error("event id {stated} does not match canonical id {computed}")]
    IdMismatch { stated: String, computed: String },

    #[error("invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// 入力メタデータの不正。何度作り直しても同じ結果になる
impl From<EventError> for PorterError {
    fn from(err: EventError) -> Self {
        PorterError::terminal(err.to_string())
    }
}
