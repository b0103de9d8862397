//! Remote signing over relays.
//!
//! - [`ConnectDescriptor`]: the out-of-band URI shown to the user (QR code / deep link)
//! - [`RemoteSession`]: connect handshake, then concurrent sign requests
//! - [`Bunker`]: an in-process remote signer that answers a descriptor
//!
//! リクエストは request id ごとに独立して待ち合わせます。応答の順序は仮定しません。

pub mod bunker;
pub mod descriptor;
pub mod rpc;
pub mod session;

use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::domain::PorterError;
use crate::event::EventError;
use crate::relay::RelayError;

pub use bunker::{Bunker, BunkerBehavior};
pub use descriptor::ConnectDescriptor;
pub use session::{RemoteSession, SessionConfig, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("no acknowledgement from the remote signer within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("session is {0:?}")]
    InvalidState(SessionState),

    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("remote signer refused: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<HandshakeError> for PorterError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::ConnectionTimeout(_) | HandshakeError::InvalidState(_) => {
                PorterError::session_expired(err.to_string())
            }
            HandshakeError::Relay(_) => PorterError::retryable(err.to_string()),
            _ => PorterError::terminal(err.to_string()),
        }
    }
}
