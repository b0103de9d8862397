//! WebSocket relay transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::channel::CHANNEL_CAPACITY;
use super::{ClientMessage, RelayChannel, RelayConnector, RelayError, RelayMessage};

/// Opens `ws://` / `wss://` connections, bounded by a connect timeout.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<RelayChannel, RelayError> {
        let parsed = url::Url::parse(url).map_err(|_| RelayError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(RelayError::InvalidUrl(url.to_string()));
        }

        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::ConnectTimeout(url.to_string()))?
            .map_err(|e| RelayError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(relay = %url, "connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<RelayMessage>(CHANNEL_CAPACITY);

        // writer: typed messages -> text frames; closes the socket when every sender is dropped
        let relay = url.to_string();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(relay = %relay, error = %e, "dropping unserializable message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(relay = %relay, error = %e, "send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader: text frames -> typed messages
        let relay = url.to_string();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match RelayMessage::from_json(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(relay = %relay, error = %e, "ignoring frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(relay = %relay, error = %e, "read failed");
                        break;
                    }
                }
            }
        });

        Ok(RelayChannel::new(url, out_tx, in_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let c = WebSocketConnector::new(Duration::from_secs(1));
        assert_eq!(
            c.connect("https://relay.example").await.unwrap_err(),
            RelayError::InvalidUrl("https://relay.example".into())
        );
        assert!(matches!(
            c.connect("not a url").await,
            Err(RelayError::InvalidUrl(_))
        ));
    }
}
