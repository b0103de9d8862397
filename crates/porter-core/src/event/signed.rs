//! Signed events and verification.

use serde::{Deserialize, Serialize};

use super::unsigned::canonical_id;
use super::{EventError, Kind, Tag};
use crate::crypto::PublicKey;

/// A signed event as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// Lowercase hex of the canonical id.
    pub id: String,
    pub pubkey: PublicKey,
    pub created_at: u64,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Lowercase hex of the 64-byte Schnorr signature.
    pub sig: String,
}

impl SignedEvent {
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        serde_json::from_str(json).map_err(|e| EventError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(|e| EventError::Serialize(e.to_string()))
    }

    /// Recompute the canonical id from the stored fields.
    pub fn compute_id(&self) -> Result<String, EventError> {
        let id = canonical_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        Ok(hex::encode(id))
    }

    /// Check the id against the fields, then the signature against the id.
    pub fn verify(&self) -> Result<(), EventError> {
        let computed = self.compute_id()?;
        if computed != self.id {
            return Err(EventError::IdMismatch {
                stated: self.id.clone(),
                computed,
            });
        }
        let id_bytes = hex::decode(&self.id).map_err(|_| EventError::InvalidSignature)?;
        let sig = hex::decode(&self.sig).map_err(|_| EventError::InvalidSignature)?;
        self.pubkey
            .verify(&id_bytes, &sig)
            .map_err(|_| EventError::InvalidSignature)
    }

    pub fn tag_value(&self, name: &str) -> Option<&str> {
        super::tag::find_value(&self.tags, name)
    }

    /// Address of a parameterized replaceable event: `<kind>:<pubkey>:<d>`.
    pub fn address(&self) -> Option<String> {
        if !self.kind.is_addressable() {
            return None;
        }
        let d = self.tag_value("d")?;
        Some(format!("{}:{}:{}", self.kind, self.pubkey, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keys, sha256};
    use crate::event::UnsignedEvent;

    fn signed(keys: &Keys) -> SignedEvent {
        UnsignedEvent::new(
            keys.public_key(),
            1_700_000_000,
            Kind::PICTURE,
            vec![Tag::hashtag("sun")],
            "caption",
        )
        .unwrap()
        .sign_with(keys)
        .unwrap()
    }

    #[test]
    fn signed_event_verifies() {
        let keys = Keys::generate();
        let ev = signed(&keys);
        ev.verify().unwrap();
        assert_eq!(ev.compute_id().unwrap(), ev.id);
    }

    #[test]
    fn json_round_trip_still_verifies() {
        let keys = Keys::generate();
        let ev = signed(&keys);
        let back = SignedEvent::from_json(&ev.to_json().unwrap()).unwrap();
        assert_eq!(back, ev);
        back.verify().unwrap();
    }

    #[test]
    fn flipping_any_canonical_byte_breaks_the_signature() {
        let keys = Keys::generate();
        let ev = signed(&keys);
        let canonical = crate::event::unsigned::canonical_bytes(
            &ev.pubkey,
            ev.created_at,
            ev.kind,
            &ev.tags,
            &ev.content,
        )
        .unwrap();
        let sig = hex::decode(&ev.sig).unwrap();

        keys.public_key().verify(&sha256(&canonical), &sig).unwrap();
        for i in 0..canonical.len() {
            let mut flipped = canonical.clone();
            flipped[i] ^= 0x01;
            assert!(
                keys.public_key().verify(&sha256(&flipped), &sig).is_err(),
                "byte {i} flipped but signature still verified"
            );
        }
    }

    #[test]
    fn edited_content_is_an_id_mismatch() {
        let keys = Keys::generate();
        let mut ev = signed(&keys);
        ev.content.push('!');
        assert!(matches!(ev.verify(), Err(EventError::IdMismatch { .. })));
    }

    #[test]
    fn recomputed_id_with_forged_sig_fails() {
        let keys = Keys::generate();
        let mut ev = signed(&keys);
        ev.content.push('!');
        ev.id = ev.compute_id().unwrap();
        assert_eq!(ev.verify(), Err(EventError::InvalidSignature));
    }

    #[test]
    fn other_author_signature_fails() {
        let a = Keys::generate();
        let b = Keys::generate();
        let mut ev = signed(&a);
        ev.pubkey = b.public_key();
        ev.id = ev.compute_id().unwrap();
        assert_eq!(ev.verify(), Err(EventError::InvalidSignature));
    }
}
