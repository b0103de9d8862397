//! Unsigned events and the canonical id.

use serde::Serialize;

use super::{EventError, Kind, SignedEvent, Tag};
use crate::crypto::{Keys, PublicKey, sha256};

/// Canonical serialization: `[0,<pubkey>,<created_at>,<kind>,<tags>,<content>]`, compact JSON.
pub fn canonical_bytes(
    pubkey: &PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> Result<Vec<u8>, EventError> {
    serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))
        .map_err(|e| EventError::Serialize(e.to_string()))
}

/// SHA-256 of the canonical serialization.
pub fn canonical_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32], EventError> {
    Ok(sha256(&canonical_bytes(pubkey, created_at, kind, tags, content)?))
}

/// An event ready for signing. The id is computed on construction and the
/// fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    id: [u8; 32],
    pubkey: PublicKey,
    created_at: u64,
    kind: Kind,
    tags: Vec<Tag>,
    content: String,
}

/// Shape sent to a remote signer (no id, no sig).
#[derive(Serialize)]
struct Template<'a> {
    pubkey: &'a PublicKey,
    created_at: u64,
    kind: Kind,
    tags: &'a [Tag],
    content: &'a str,
}

impl UnsignedEvent {
    pub fn new(
        pubkey: PublicKey,
        created_at: u64,
        kind: Kind,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Result<Self, EventError> {
        let content = content.into();
        let id = canonical_id(&pubkey, created_at, kind, &tags, &content)?;
        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
        })
    }

    pub fn id(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>, EventError> {
        canonical_bytes(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// JSON template for a remote `sign_event` request.
    pub fn to_template_json(&self) -> Result<String, EventError> {
        serde_json::to_string(&Template {
            pubkey: &self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: &self.tags,
            content: &self.content,
        })
        .map_err(|e| EventError::Serialize(e.to_string()))
    }

    /// Sign locally. `keys` must belong to the event author.
    pub fn sign_with(self, keys: &Keys) -> Result<SignedEvent, EventError> {
        let signer = keys.public_key();
        if signer != self.pubkey {
            return Err(EventError::AuthorMismatch {
                expected: self.pubkey.to_hex(),
                actual: signer.to_hex(),
            });
        }
        let sig = keys.sign_digest(&self.id)?;
        Ok(self.into_signed(hex::encode(sig)))
    }

    /// Attach a signature produced elsewhere. Not verified here.
    pub fn into_signed(self, sig: String) -> SignedEvent {
        SignedEvent {
            id: hex::encode(self.id),
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: u8) -> Keys {
        let mut s = [0u8; 32];
        s[31] = n;
        Keys::from_secret_bytes(s).unwrap()
    }

    #[test]
    fn canonical_form_is_compact_and_ordered() {
        let k = keys(1);
        let ev = UnsignedEvent::new(
            k.public_key(),
            1_700_000_000,
            Kind::TEXT_NOTE,
            vec![Tag::hashtag("sun")],
            "line1\n\"quoted\"",
        )
        .unwrap();
        let bytes = ev.canonical_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            format!(
                r#"[0,"{}",1700000000,1,[["t","sun"]],"line1\n\"quoted\""]"#,
                k.public_key()
            )
        );
    }

    #[test]
    fn id_is_sha256_of_canonical_bytes() {
        let k = keys(3);
        let ev = UnsignedEvent::new(k.public_key(), 1, Kind::PICTURE, vec![], "x").unwrap();
        assert_eq!(*ev.id(), sha256(&ev.canonical_bytes().unwrap()));
    }

    #[test]
    fn id_changes_with_any_field() {
        let k = keys(3);
        let base = UnsignedEvent::new(k.public_key(), 1, Kind::PICTURE, vec![], "x").unwrap();
        let later = UnsignedEvent::new(k.public_key(), 2, Kind::PICTURE, vec![], "x").unwrap();
        let other_kind = UnsignedEvent::new(k.public_key(), 1, Kind::VIDEO, vec![], "x").unwrap();
        assert_ne!(base.id(), later.id());
        assert_ne!(base.id(), other_kind.id());
    }

    #[test]
    fn signing_with_foreign_keys_is_refused() {
        let ev = UnsignedEvent::new(keys(1).public_key(), 1, Kind::TEXT_NOTE, vec![], "x").unwrap();
        assert!(matches!(
            ev.sign_with(&keys(2)),
            Err(EventError::AuthorMismatch { .. })
        ));
    }

    #[test]
    fn template_has_no_id_or_sig() {
        let ev = UnsignedEvent::new(keys(1).public_key(), 5, Kind::TEXT_NOTE, vec![], "x").unwrap();
        let v: serde_json::Value = serde_json::from_str(&ev.to_template_json().unwrap()).unwrap();
        assert!(v.get("id").is_none());
        assert!(v.get("sig").is_none());
        assert_eq!(v["kind"], 1);
        assert_eq!(v["created_at"], 5);
    }
}
