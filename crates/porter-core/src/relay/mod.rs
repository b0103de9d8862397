//! Relays: wire protocol, connections and best-effort multi-relay publishing.

pub mod channel;
pub mod filter;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod websocket;

use thiserror::Error;

use crate::domain::PorterError;

pub use channel::{RelayChannel, RelayConnector, RelaySender};
pub use filter::Filter;
pub use memory::{MemoryRelays, RelayBehavior};
pub use message::{ClientMessage, RelayMessage};
pub use publisher::{PublishReport, RelayPublisher};
pub use websocket::WebSocketConnector;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("invalid relay url {0:?}")]
    InvalidUrl(String),

    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    #[error("connection to {0} closed")]
    Closed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no relay acknowledged event {event_id} ({failed} failed)")]
    NoAcknowledgement { event_id: String, failed: usize },
}

/// Relay trouble is always worth another attempt.
impl From<RelayError> for PorterError {
    fn from(err: RelayError) -> Self {
        PorterError::retryable(err.to_string())
    }
}
