//! One open relay connection, as a pair of channels.
//!
//! The transport (WebSocket, in-process) runs its own pump tasks; callers
//! only see typed messages. Dropping every sender closes the connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ClientMessage, RelayError, RelayMessage};

/// Buffer size for both directions.
pub const CHANNEL_CAPACITY: usize = 64;

/// Opens relay connections.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<RelayChannel, RelayError>;
}

/// Outbound half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RelaySender {
    url: String,
    tx: mpsc::Sender<ClientMessage>,
}

impl RelaySender {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<(), RelayError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| RelayError::Closed(self.url.clone()))
    }
}

#[derive(Debug)]
pub struct RelayChannel {
    sender: RelaySender,
    inbound: mpsc::Receiver<RelayMessage>,
}

impl RelayChannel {
    pub fn new(
        url: impl Into<String>,
        outbound: mpsc::Sender<ClientMessage>,
        inbound: mpsc::Receiver<RelayMessage>,
    ) -> Self {
        Self {
            sender: RelaySender {
                url: url.into(),
                tx: outbound,
            },
            inbound,
        }
    }

    pub fn url(&self) -> &str {
        self.sender.url()
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<(), RelayError> {
        self.sender.send(msg).await
    }

    /// Next message, or `None` once the relay side is gone.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.inbound.recv().await
    }

    /// Split for concurrent send and receive.
    pub fn into_parts(self) -> (RelaySender, mpsc::Receiver<RelayMessage>) {
        (self.sender, self.inbound)
    }
}
