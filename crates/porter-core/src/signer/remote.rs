use async_trait::async_trait;

use super::{SignError, Signer};
use crate::crypto::PublicKey;
use crate::event::{SignedEvent, UnsignedEvent};
use crate::remote::{HandshakeError, RemoteSession};

/// Signs through a connected [`RemoteSession`].
#[derive(Clone)]
pub struct RemoteSigner {
    session: RemoteSession,
    user: PublicKey,
}

impl RemoteSigner {
    /// The session must have completed its handshake.
    pub fn new(session: RemoteSession) -> Result<Self, HandshakeError> {
        let user = session
            .user_pubkey()
            .ok_or(HandshakeError::InvalidState(session.state()))?;
        Ok(Self { session, user })
    }

    pub fn session(&self) -> &RemoteSession {
        &self.session
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn public_key(&self) -> PublicKey {
        self.user
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<SignedEvent, SignError> {
        self.session.sign_event(event).await
    }
}
