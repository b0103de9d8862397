//! Remote-signer RPC bodies and their encrypted event envelope.

use serde::{Deserialize, Serialize};

use super::HandshakeError;
use crate::crypto::{Keys, PublicKey, nip44};
use crate::event::{Kind, SignedEvent, Tag, UnsignedEvent};

pub const CONNECT: &str = "connect";
pub const GET_PUBLIC_KEY: &str = "get_public_key";
pub const SIGN_EVENT: &str = "sign_event";
pub const PING: &str = "ping";

/// `result` value that announces an authorization URL instead of an answer.
pub const AUTH_URL: &str = "auth_url";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request {
    pub fn new(method: &str, params: Vec<String>) -> Self {
        Self {
            id: new_request_id(),
            method: method.to_string(),
            params,
        }
    }
}

impl Response {
    pub fn ok(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

pub fn new_request_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Encrypt `body` to `recipient` and wrap it in a signed envelope event.
pub fn seal<T: Serialize>(
    keys: &Keys,
    recipient: &PublicKey,
    body: &T,
    created_at: u64,
) -> Result<SignedEvent, HandshakeError> {
    let json = serde_json::to_string(body).map_err(|e| HandshakeError::Protocol(e.to_string()))?;
    let ck = nip44::conversation_key(keys, recipient)?;
    let content = nip44::encrypt(&ck, &json)?;
    let unsigned = UnsignedEvent::new(
        keys.public_key(),
        created_at,
        Kind::NOSTR_CONNECT,
        vec![Tag::public_key(recipient.to_hex())],
        content,
    )?;
    Ok(unsigned.sign_with(keys)?)
}

/// Verify and decrypt an envelope addressed to `keys`.
pub fn open<T: for<'de> Deserialize<'de>>(keys: &Keys, event: &SignedEvent) -> Result<T, HandshakeError> {
    if event.kind != Kind::NOSTR_CONNECT {
        return Err(HandshakeError::Protocol(format!("unexpected kind {}", event.kind)));
    }
    event.verify()?;
    let ck = nip44::conversation_key(keys, &event.pubkey)?;
    let json = nip44::decrypt(&ck, &event.content)?;
    serde_json::from_str(&json).map_err(|e| HandshakeError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_request_opens_for_recipient_only() {
        let client = Keys::generate();
        let signer = Keys::generate();
        let stranger = Keys::generate();

        let req = Request::new(SIGN_EVENT, vec!["{}".into()]);
        let envelope = seal(&client, &signer.public_key(), &req, 100).unwrap();

        assert_eq!(envelope.kind, Kind::NOSTR_CONNECT);
        assert_eq!(envelope.tag_value("p"), Some(signer.public_key().to_hex().as_str()));
        assert_ne!(envelope.content, serde_json::to_string(&req).unwrap());

        let opened: Request = open(&signer, &envelope).unwrap();
        assert_eq!(opened, req);
        assert!(open::<Request>(&stranger, &envelope).is_err());
    }

    #[test]
    fn response_shape() {
        let ok = serde_json::to_string(&Response::ok("1", "pong")).unwrap();
        assert_eq!(ok, r#"{"id":"1","result":"pong"}"#);
        let err: Response = serde_json::from_str(r#"{"id":"2","error":"denied"}"#).unwrap();
        assert_eq!(err, Response::err("2", "denied"));
    }

    #[test]
    fn request_ids_are_fresh() {
        assert_ne!(new_request_id(), new_request_id());
        assert_eq!(new_request_id().len(), 16);
    }
}
