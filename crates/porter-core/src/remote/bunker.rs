//! In-process remote signer.
//!
//! Answers a [`ConnectDescriptor`] the way a signer app on another device
//! would: acknowledge with the secret, then serve `get_public_key`,
//! `sign_event` and `ping` over the same relay. Handy for local runs where
//! the "remote" key lives in another process of ours.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::descriptor::ConnectDescriptor;
use super::rpc::{self, AUTH_URL, CONNECT, GET_PUBLIC_KEY, PING, Request, Response, SIGN_EVENT};
use super::HandshakeError;
use crate::crypto::{Keys, PublicKey};
use crate::event::{Kind, Tag, UnsignedEvent};
use crate::relay::{ClientMessage, Filter, RelayChannel, RelayConnector, RelayError, RelayMessage};

/// How `sign_event` requests are answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BunkerBehavior {
    Approve,
    Reject(String),
    /// Never answer.
    Ignore,
    /// Announce an authorization URL first, then approve.
    AuthUrlThenApprove(String),
}

#[derive(Deserialize)]
struct Template {
    #[serde(default)]
    pubkey: Option<PublicKey>,
    created_at: u64,
    kind: Kind,
    #[serde(default)]
    tags: Vec<Tag>,
    content: String,
}

#[derive(Clone)]
pub struct Bunker {
    /// Identity on the relay (distinct from the user key).
    signer_keys: Keys,
    user_keys: Keys,
    behavior: Arc<Mutex<BunkerBehavior>>,
    signed: Arc<AtomicUsize>,
}

impl Bunker {
    pub fn new(user_keys: Keys) -> Self {
        Self {
            signer_keys: Keys::generate(),
            user_keys,
            behavior: Arc::new(Mutex::new(BunkerBehavior::Approve)),
            signed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_behavior(self, behavior: BunkerBehavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            ..self
        }
    }

    pub async fn set_behavior(&self, behavior: BunkerBehavior) {
        *self.behavior.lock().await = behavior;
    }

    pub fn signer_pubkey(&self) -> PublicKey {
        self.signer_keys.public_key()
    }

    pub fn user_pubkey(&self) -> PublicKey {
        self.user_keys.public_key()
    }

    /// Events signed so far.
    pub fn signed_count(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }

    /// Acknowledge `descriptor` on its first relay and serve requests until
    /// the connection closes or the returned task is aborted.
    pub async fn accept(
        &self,
        connector: Arc<dyn RelayConnector>,
        descriptor: &ConnectDescriptor,
    ) -> Result<JoinHandle<()>, HandshakeError> {
        let relay = descriptor
            .relays
            .first()
            .ok_or_else(|| HandshakeError::InvalidDescriptor("no relay".into()))?;
        let channel = connector.connect(relay).await?;

        let now = unix_now();
        channel
            .send(ClientMessage::Req {
                subscription_id: "bunker".to_string(),
                filters: vec![
                    Filter::new()
                        .kind(Kind::NOSTR_CONNECT)
                        .p_tag(&self.signer_pubkey())
                        .since(now),
                ],
            })
            .await?;

        let ack = rpc::seal(
            &self.signer_keys,
            &descriptor.client_pubkey,
            &Response::ok(rpc::new_request_id(), descriptor.secret.clone()),
            now,
        )?;
        channel.send(ClientMessage::Event(ack)).await?;
        info!(client = %descriptor.client_pubkey, relay = %relay, "bunker acknowledged descriptor");

        let bunker = self.clone();
        Ok(tokio::spawn(async move { bunker.serve(channel).await }))
    }

    async fn serve(self, mut channel: RelayChannel) {
        while let Some(msg) = channel.recv().await {
            let RelayMessage::Event { event, .. } = msg else {
                continue;
            };
            let req: Request = match rpc::open(&self.signer_keys, &event) {
                Ok(req) => req,
                Err(e) => {
                    debug!(error = %e, "bunker ignoring envelope");
                    continue;
                }
            };
            for resp in self.answer(&req).await {
                let sealed = match rpc::seal(&self.signer_keys, &event.pubkey, &resp, unix_now()) {
                    Ok(sealed) => sealed,
                    Err(e) => {
                        debug!(error = %e, "bunker failed to seal response");
                        continue;
                    }
                };
                if let Err(RelayError::Closed(_)) = channel.send(ClientMessage::Event(sealed)).await {
                    return;
                }
            }
        }
    }

    async fn answer(&self, req: &Request) -> Vec<Response> {
        match req.method.as_str() {
            CONNECT => vec![Response::ok(&req.id, "ack")],
            PING => vec![Response::ok(&req.id, "pong")],
            GET_PUBLIC_KEY => vec![Response::ok(&req.id, self.user_pubkey().to_hex())],
            SIGN_EVENT => {
                let behavior = self.behavior.lock().await.clone();
                match behavior {
                    BunkerBehavior::Ignore => Vec::new(),
                    BunkerBehavior::Reject(reason) => vec![Response::err(&req.id, reason)],
                    BunkerBehavior::Approve => vec![self.sign(req)],
                    BunkerBehavior::AuthUrlThenApprove(url) => vec![
                        Response {
                            id: req.id.clone(),
                            result: Some(AUTH_URL.to_string()),
                            error: Some(url),
                        },
                        self.sign(req),
                    ],
                }
            }
            other => vec![Response::err(&req.id, format!("unsupported method {other}"))],
        }
    }

    fn sign(&self, req: &Request) -> Response {
        let Some(param) = req.params.first() else {
            return Response::err(&req.id, "missing event");
        };
        let template: Template = match serde_json::from_str(param) {
            Ok(t) => t,
            Err(e) => return Response::err(&req.id, format!("bad event: {e}")),
        };
        if template.pubkey.is_some_and(|pk| pk != self.user_pubkey()) {
            return Response::err(&req.id, "event author is not this user");
        }
        let signed = UnsignedEvent::new(
            self.user_pubkey(),
            template.created_at,
            template.kind,
            template.tags,
            template.content,
        )
        .and_then(|e| e.sign_with(&self.user_keys))
        .and_then(|e| e.to_json());
        match signed {
            Ok(json) => {
                self.signed.fetch_add(1, Ordering::SeqCst);
                Response::ok(&req.id, json)
            }
            Err(e) => Response::err(&req.id, e.to_string()),
        }
    }
}

fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}
