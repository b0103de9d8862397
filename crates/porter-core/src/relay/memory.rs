//! In-process relays.
//!
//! Speaks the same typed messages as a WebSocket relay, with a scripted
//! behavior per URL. Stored events are replayed to new subscriptions, and
//! accepted events fan out to live ones, so two parties connected to the
//! same URL can talk through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::channel::CHANNEL_CAPACITY;
use super::{ClientMessage, Filter, RelayChannel, RelayConnector, RelayError, RelayMessage};
use crate::event::SignedEvent;

/// How a relay answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayBehavior {
    /// `OK true`.
    Accept,
    /// `OK true "duplicate: ..."`.
    Duplicate,
    /// `OK false <reason>`.
    Reject(String),
    /// Accepts the connection, never answers an EVENT.
    Silent,
    /// Connection attempts fail immediately.
    Refuse,
    /// Connection attempts never complete.
    Unreachable,
}

struct Subscription {
    conn: u64,
    id: String,
    filters: Vec<Filter>,
    tx: mpsc::Sender<RelayMessage>,
}

struct RelayState {
    behavior: RelayBehavior,
    events: Vec<SignedEvent>,
    subscriptions: Vec<Subscription>,
    connections: usize,
}

#[derive(Clone, Default)]
pub struct MemoryRelays {
    relays: Arc<Mutex<HashMap<String, RelayState>>>,
    next_conn: Arc<AtomicU64>,
}

impl MemoryRelays {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, url: impl Into<String>, behavior: RelayBehavior) {
        self.relays.lock().await.insert(
            url.into(),
            RelayState {
                behavior,
                events: Vec::new(),
                subscriptions: Vec::new(),
                connections: 0,
            },
        );
    }

    pub async fn set_behavior(&self, url: &str, behavior: RelayBehavior) {
        if let Some(relay) = self.relays.lock().await.get_mut(url) {
            relay.behavior = behavior;
        }
    }

    /// Events the relay has stored.
    pub async fn events(&self, url: &str) -> Vec<SignedEvent> {
        self.relays
            .lock()
            .await
            .get(url)
            .map(|r| r.events.clone())
            .unwrap_or_default()
    }

    /// Connections opened so far.
    pub async fn connections(&self, url: &str) -> usize {
        self.relays
            .lock()
            .await
            .get(url)
            .map(|r| r.connections)
            .unwrap_or_default()
    }

    async fn handle(&self, url: &str, conn: u64, msg: ClientMessage, reply: &mpsc::Sender<RelayMessage>) {
        match msg {
            ClientMessage::Event(event) => {
                let (answer, fanout) = self.store(url, event).await;
                for (tx, msg) in fanout {
                    let _ = tx.send(msg).await;
                }
                if let Some(answer) = answer {
                    let _ = reply.send(answer).await;
                }
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let backlog: Vec<SignedEvent> = {
                    let mut relays = self.relays.lock().await;
                    let Some(relay) = relays.get_mut(url) else {
                        return;
                    };
                    relay
                        .subscriptions
                        .retain(|s| !(s.conn == conn && s.id == subscription_id));
                    relay.subscriptions.push(Subscription {
                        conn,
                        id: subscription_id.clone(),
                        filters: filters.clone(),
                        tx: reply.clone(),
                    });
                    relay
                        .events
                        .iter()
                        .filter(|e| filters.iter().any(|f| f.matches(e)))
                        .cloned()
                        .collect()
                };
                for event in backlog {
                    let _ = reply
                        .send(RelayMessage::Event {
                            subscription_id: subscription_id.clone(),
                            event,
                        })
                        .await;
                }
                let _ = reply.send(RelayMessage::Eose(subscription_id)).await;
            }
            ClientMessage::Close(subscription_id) => {
                if let Some(relay) = self.relays.lock().await.get_mut(url) {
                    relay
                        .subscriptions
                        .retain(|s| !(s.conn == conn && s.id == subscription_id));
                }
            }
        }
    }

    /// Apply the relay's behavior to an incoming event.
    ///
    /// Returns the OK answer (if any) and the deliveries to live subscriptions.
    async fn store(
        &self,
        url: &str,
        event: SignedEvent,
    ) -> (Option<RelayMessage>, Vec<(mpsc::Sender<RelayMessage>, RelayMessage)>) {
        let mut relays = self.relays.lock().await;
        let Some(relay) = relays.get_mut(url) else {
            return (None, Vec::new());
        };
        let ok = |accepted: bool, message: String| RelayMessage::Ok {
            event_id: event.id.clone(),
            accepted,
            message,
        };

        match relay.behavior.clone() {
            RelayBehavior::Silent | RelayBehavior::Refuse | RelayBehavior::Unreachable => {
                (None, Vec::new())
            }
            RelayBehavior::Reject(reason) => (Some(ok(false, reason)), Vec::new()),
            RelayBehavior::Accept | RelayBehavior::Duplicate => {
                if let Err(e) = event.verify() {
                    return (Some(ok(false, format!("invalid: {e}"))), Vec::new());
                }
                let duplicate = relay.behavior == RelayBehavior::Duplicate
                    || relay.events.iter().any(|e| e.id == event.id);
                let answer = if duplicate {
                    ok(true, "duplicate: already have this event".into())
                } else {
                    ok(true, String::new())
                };

                let mut fanout = Vec::new();
                if !relay.events.iter().any(|e| e.id == event.id) {
                    for sub in &relay.subscriptions {
                        if sub.filters.iter().any(|f| f.matches(&event)) {
                            fanout.push((
                                sub.tx.clone(),
                                RelayMessage::Event {
                                    subscription_id: sub.id.clone(),
                                    event: event.clone(),
                                },
                            ));
                        }
                    }
                    relay.events.push(event.clone());
                }
                (Some(answer), fanout)
            }
        }
    }

    async fn disconnect(&self, url: &str, conn: u64) {
        if let Some(relay) = self.relays.lock().await.get_mut(url) {
            relay.subscriptions.retain(|s| s.conn != conn);
        }
    }
}

#[async_trait]
impl RelayConnector for MemoryRelays {
    async fn connect(&self, url: &str) -> Result<RelayChannel, RelayError> {
        let behavior = {
            let mut relays = self.relays.lock().await;
            let relay = relays.get_mut(url).ok_or_else(|| RelayError::Connect {
                url: url.to_string(),
                reason: "no such relay".into(),
            })?;
            if !matches!(
                relay.behavior,
                RelayBehavior::Refuse | RelayBehavior::Unreachable
            ) {
                relay.connections += 1;
            }
            relay.behavior.clone()
        };
        match behavior {
            RelayBehavior::Refuse => {
                return Err(RelayError::Connect {
                    url: url.to_string(),
                    reason: "connection refused".into(),
                });
            }
            RelayBehavior::Unreachable => std::future::pending::<()>().await,
            _ => {}
        }

        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<RelayMessage>(CHANNEL_CAPACITY);

        let relays = self.clone();
        let relay_url = url.to_string();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                relays.handle(&relay_url, conn, msg, &in_tx).await;
            }
            relays.disconnect(&relay_url, conn).await;
            debug!(relay = %relay_url, conn, "memory relay connection closed");
        });

        Ok(RelayChannel::new(url, out_tx, in_rx))
    }
}
