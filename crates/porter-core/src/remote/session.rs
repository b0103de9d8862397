//! Remote signing session.
//!
//! ```text
//! idle --connect--> connecting --ack, get_public_key--> connected --ttl / relay lost / close--> expired
//!                       |                                 |    ^
//!                       +------------ timeout ------------+    +-- sign_event (any number in flight)
//!                                       v
//!                                    expired
//! ```
//!
//! `expired` は終端。署名を続けるには新しいセッションで connect からやり直す。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::descriptor::ConnectDescriptor;
use super::rpc::{self, AUTH_URL, GET_PUBLIC_KEY, Request, Response, SIGN_EVENT};
use super::HandshakeError;
use crate::crypto::{Keys, PublicKey};
use crate::event::{EventError, Kind, SignedEvent, UnsignedEvent};
use crate::relay::{ClientMessage, Filter, RelayConnector, RelayError, RelayMessage, RelaySender};
use crate::signer::SignError;

const SUBSCRIPTION_ID: &str = "porter-nip46";

/// Accepted clock difference between us and the remote signer.
const CLOCK_SKEW_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Expired,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay both sides meet on.
    pub relay: String,
    pub app_name: String,
    pub handshake_timeout: Duration,
    pub sign_timeout: Duration,
    /// Lifetime after the handshake completes.
    pub ttl: Duration,
}

impl SessionConfig {
    pub fn new(relay: impl Into<String>) -> Self {
        Self {
            relay: relay.into(),
            app_name: "porter".to_string(),
            handshake_timeout: Duration::from_secs(60),
            sign_timeout: Duration::from_secs(30),
            ttl: Duration::from_secs(3600),
        }
    }
}

enum RequestFailure {
    Timeout,
    Rejected(String),
    Closed,
    Protocol(String),
}

/// Handle to a session. Clones share the same session.
#[derive(Clone)]
pub struct RemoteSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn RelayConnector>,
    /// Ephemeral identity of this side.
    client: Keys,
    descriptor: ConnectDescriptor,
    opened_at: u64,
    state: watch::Sender<SessionState>,
    signer_pubkey: OnceLock<PublicKey>,
    user_pubkey: OnceLock<PublicKey>,
    expires_at: OnceLock<Instant>,
    outbound: Mutex<Option<RelaySender>>,
    pending: Mutex<HashMap<String, mpsc::Sender<Response>>>,
    ack: Mutex<Option<oneshot::Sender<PublicKey>>>,
}

impl RemoteSession {
    /// New idle session with a fresh client key and secret.
    pub fn new(connector: Arc<dyn RelayConnector>, config: SessionConfig) -> Self {
        let client = Keys::generate();
        let descriptor = ConnectDescriptor {
            client_pubkey: client.public_key(),
            relays: vec![config.relay.clone()],
            secret: hex::encode(rand::random::<[u8; 16]>()),
            name: Some(config.app_name.clone()),
            perms: vec![SIGN_EVENT.to_string()],
        };
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                client,
                descriptor,
                opened_at: unix_now(),
                state,
                signer_pubkey: OnceLock::new(),
                user_pubkey: OnceLock::new(),
                expires_at: OnceLock::new(),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                ack: Mutex::new(None),
            }),
        }
    }

    /// What the remote signer needs to find us. Available before `connect`.
    pub fn descriptor(&self) -> &ConnectDescriptor {
        &self.inner.descriptor
    }

    pub fn client_pubkey(&self) -> PublicKey {
        self.inner.client.public_key()
    }

    pub fn relay(&self) -> &str {
        &self.inner.config.relay
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Remote signer identity, known after the ack.
    pub fn signer_pubkey(&self) -> Option<PublicKey> {
        self.inner.signer_pubkey.get().copied()
    }

    /// The identity events are signed as, known once connected.
    pub fn user_pubkey(&self) -> Option<PublicKey> {
        self.inner.user_pubkey.get().copied()
    }

    /// Wait for the remote signer to acknowledge the descriptor, then learn
    /// the user identity. The whole exchange is bounded by the handshake timeout.
    pub async fn connect(&self) -> Result<PublicKey, HandshakeError> {
        let started = self.inner.state.send_if_modified(|s| {
            if *s == SessionState::Idle {
                *s = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(HandshakeError::InvalidState(self.state()));
        }
        info!(
            client = %self.client_pubkey(),
            relay = %self.relay(),
            "waiting for remote signer"
        );

        let limit = self.inner.config.handshake_timeout;
        match tokio::time::timeout(limit, self.handshake()).await {
            Ok(Ok(user)) => {
                let _ = self
                    .inner
                    .expires_at
                    .set(Instant::now() + self.inner.config.ttl);
                self.inner.state.send_replace(SessionState::Connected);
                info!(user = %user, "remote signing session connected");
                Ok(user)
            }
            Ok(Err(e)) => {
                self.inner.expire(&e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                self.inner.expire("handshake timed out").await;
                Err(HandshakeError::ConnectionTimeout(limit))
            }
        }
    }

    async fn handshake(&self) -> Result<PublicKey, HandshakeError> {
        let inner = &self.inner;
        let channel = inner.connector.connect(&inner.config.relay).await?;
        let (sender, inbound) = channel.into_parts();

        let (ack_tx, ack_rx) = oneshot::channel();
        *inner.ack.lock().await = Some(ack_tx);

        let filter = Filter::new()
            .kind(Kind::NOSTR_CONNECT)
            .p_tag(&inner.client.public_key())
            .since(inner.opened_at.saturating_sub(CLOCK_SKEW_SECS));
        sender
            .send(ClientMessage::Req {
                subscription_id: SUBSCRIPTION_ID.to_string(),
                filters: vec![filter],
            })
            .await?;
        *inner.outbound.lock().await = Some(sender);
        tokio::spawn(read_loop(Arc::downgrade(inner), inbound));

        let signer = ack_rx
            .await
            .map_err(|_| RelayError::Closed(inner.config.relay.clone()))?;
        let _ = inner.signer_pubkey.set(signer);
        info!(signer = %signer, "remote signer acknowledged");

        let user_hex = match inner
            .request(GET_PUBLIC_KEY, Vec::new(), inner.config.handshake_timeout)
            .await
        {
            Ok(hex) => hex,
            Err(RequestFailure::Rejected(reason)) => return Err(HandshakeError::Rejected(reason)),
            Err(RequestFailure::Protocol(reason)) => return Err(HandshakeError::Protocol(reason)),
            Err(RequestFailure::Timeout) => {
                return Err(HandshakeError::ConnectionTimeout(inner.config.handshake_timeout));
            }
            Err(RequestFailure::Closed) => {
                return Err(RelayError::Closed(inner.config.relay.clone()).into());
            }
        };
        let user = PublicKey::from_hex(user_hex.trim())?;
        let _ = inner.user_pubkey.set(user);
        Ok(user)
    }

    /// Ask the remote signer to sign `unsigned`.
    ///
    /// Each call waits for its own response within the sign timeout; other
    /// requests in flight do not affect it. The returned event is verified
    /// and must carry the id we computed.
    pub async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<SignedEvent, SignError> {
        let inner = &self.inner;
        inner.ensure_live().await?;

        let user = self
            .user_pubkey()
            .ok_or_else(|| SignError::SessionExpired("no user identity".into()))?;
        if *unsigned.pubkey() != user {
            return Err(EventError::AuthorMismatch {
                expected: user.to_hex(),
                actual: unsigned.pubkey().to_hex(),
            }
            .into());
        }
        let template = unsigned.to_template_json()?;

        let json = match inner
            .request(SIGN_EVENT, vec![template], inner.config.sign_timeout)
            .await
        {
            Ok(json) => json,
            Err(RequestFailure::Timeout) => return Err(SignError::Timeout),
            Err(RequestFailure::Rejected(reason)) => return Err(SignError::Rejected(reason)),
            Err(RequestFailure::Closed) => {
                return Err(SignError::SessionExpired("relay connection lost".into()));
            }
            Err(RequestFailure::Protocol(reason)) => return Err(SignError::Invalid(reason)),
        };

        let signed = SignedEvent::from_json(&json).map_err(|e| SignError::Invalid(e.to_string()))?;
        signed
            .verify()
            .map_err(|e| SignError::Invalid(e.to_string()))?;
        if signed.id != unsigned.id_hex() {
            return Err(SignError::Invalid(format!(
                "signer returned event {} for request {}",
                signed.id,
                unsigned.id_hex()
            )));
        }
        Ok(signed)
    }

    /// End the session. Requests in flight fail as expired.
    pub async fn close(&self) {
        self.inner.expire("closed").await;
    }
}

impl Inner {
    async fn ensure_live(&self) -> Result<(), SignError> {
        let state = *self.state.borrow();
        if state != SessionState::Connected {
            return Err(SignError::SessionExpired(format!("session is {state:?}")));
        }
        if let Some(at) = self.expires_at.get()
            && Instant::now() >= *at
        {
            self.expire("session ttl elapsed").await;
            return Err(SignError::SessionExpired("session ttl elapsed".into()));
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Vec<String>,
        timeout: Duration,
    ) -> Result<String, RequestFailure> {
        let recipient = self
            .signer_pubkey
            .get()
            .copied()
            .ok_or(RequestFailure::Closed)?;
        let req = Request::new(method, params);
        let envelope = rpc::seal(&self.client, &recipient, &req, unix_now())
            .map_err(|e| RequestFailure::Protocol(e.to_string()))?;
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(RequestFailure::Closed)?;

        let (tx, mut rx) = mpsc::channel(4);
        self.pending.lock().await.insert(req.id.clone(), tx);
        debug!(id = %req.id, method, "remote request");

        let outcome = async {
            sender
                .send(ClientMessage::Event(envelope))
                .await
                .map_err(|_| RequestFailure::Closed)?;
            while let Some(resp) = rx.recv().await {
                if resp.result.as_deref() == Some(AUTH_URL) {
                    info!(
                        id = %req.id,
                        url = resp.error.as_deref().unwrap_or_default(),
                        "remote signer asks for authorization"
                    );
                    continue;
                }
                return match (resp.error, resp.result) {
                    (Some(error), _) => Err(RequestFailure::Rejected(error)),
                    (None, Some(result)) => Ok(result),
                    (None, None) => Err(RequestFailure::Protocol("empty response".into())),
                };
            }
            Err(RequestFailure::Closed)
        };
        let result = tokio::time::timeout(timeout, outcome)
            .await
            .unwrap_or(Err(RequestFailure::Timeout));

        self.pending.lock().await.remove(&req.id);
        result
    }

    async fn dispatch(&self, event: SignedEvent) {
        // ack 後は応答元を signer に限る
        if let Some(signer) = self.signer_pubkey.get()
            && event.pubkey != *signer
        {
            debug!(author = %event.pubkey, "ignoring envelope from another key");
            return;
        }
        let response: Response = match rpc::open(&self.client, &event) {
            Ok(r) => r,
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "ignoring undecodable envelope");
                return;
            }
        };

        let waiter = self.pending.lock().await.get(&response.id).cloned();
        if let Some(tx) = waiter {
            let _ = tx.send(response).await;
            return;
        }

        let secret = self.descriptor.secret.as_str();
        let is_ack = response.result.as_deref() == Some(secret)
            || (response.result.as_deref() == Some("ack") && response.id == secret);
        if is_ack {
            if let Some(tx) = self.ack.lock().await.take() {
                let _ = tx.send(event.pubkey);
            }
            return;
        }
        debug!(id = %response.id, "uncorrelated response");
    }

    async fn expire(&self, reason: &str) {
        let changed = self.state.send_if_modified(|s| {
            if *s != SessionState::Expired {
                *s = SessionState::Expired;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }
        warn!(client = %self.client.public_key(), reason, "remote signing session expired");
        // dropping the sender closes the relay connection
        self.outbound.lock().await.take();
        self.pending.lock().await.clear();
        self.ack.lock().await.take();
    }
}

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::Receiver<RelayMessage>) {
    while let Some(msg) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match msg {
            RelayMessage::Event { event, .. } => inner.dispatch(event).await,
            RelayMessage::Closed { message, .. } => {
                inner.expire(&format!("subscription closed: {message}")).await;
                return;
            }
            RelayMessage::Notice(notice) => debug!(%notice, "relay notice"),
            _ => {}
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.expire("relay connection lost").await;
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
