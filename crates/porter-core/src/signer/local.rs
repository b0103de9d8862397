use async_trait::async_trait;

use super::{SignError, Signer};
use crate::crypto::{Keys, PublicKey};
use crate::event::{SignedEvent, UnsignedEvent};

/// Signs with a key held in memory. Deterministic: zero aux randomness.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    keys: Keys,
}

impl LocalSigner {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl Signer for LocalSigner {
    fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<SignedEvent, SignError> {
        Ok(event.sign_with(&self.keys)?)
    }
}
