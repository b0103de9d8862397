//! Signer: turns an unsigned event into a signed one.
//!
//! Two implementations:
//! - [`LocalSigner`]: the process holds the key
//! - [`RemoteSigner`]: a remote agent holds it, reached through a [`crate::remote::RemoteSession`]
//!
//! Jobs find their signer through the [`SignerRegistry`].

pub mod local;
pub mod registry;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::crypto::PublicKey;
use crate::domain::PorterError;
use crate::event::{EventError, SignedEvent, UnsignedEvent};

pub use local::LocalSigner;
pub use registry::SignerRegistry;
pub use remote::RemoteSigner;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    #[error("signing timed out")]
    Timeout,

    #[error("signing rejected: {0}")]
    Rejected(String),

    #[error("signing session expired: {0}")]
    SessionExpired(String),

    #[error("signed event is invalid: {0}")]
    Invalid(String),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<SignError> for PorterError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::Timeout => PorterError::retryable(err.to_string()),
            SignError::SessionExpired(_) => PorterError::session_expired(err.to_string()),
            // a remote signer returning garbage is worth another try
            SignError::Invalid(_) => PorterError::retryable(err.to_string()),
            SignError::Rejected(_) | SignError::Event(_) => PorterError::terminal(err.to_string()),
        }
    }
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Author of every event this signer signs.
    fn public_key(&self) -> PublicKey;

    async fn sign(&self, event: UnsignedEvent) -> Result<SignedEvent, SignError>;
}
