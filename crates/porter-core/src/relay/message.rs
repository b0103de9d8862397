//! Relay wire messages (JSON array text frames).
//!
//! ```text
//! client -> relay   ["EVENT", <event>]  ["REQ", <sub id>, <filter>...]  ["CLOSE", <sub id>]
//! relay  -> client  ["OK", <event id>, <bool>, <message>]  ["EVENT", <sub id>, <event>]
//!                   ["EOSE", <sub id>]  ["CLOSED", <sub id>, <message>]  ["NOTICE", <message>]
//! ```

use serde_json::{Value, json};

use super::{Filter, RelayError};
use crate::event::SignedEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(SignedEvent),
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    Close(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Event {
        subscription_id: String,
        event: SignedEvent,
    },
    Eose(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, RelayError> {
        let value = match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = vec![json!("REQ"), json!(subscription_id)];
                for f in filters {
                    parts.push(serde_json::to_value(f).map_err(protocol)?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close(id) => json!(["CLOSE", id]),
        };
        serde_json::to_string(&value).map_err(protocol)
    }

    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let parts = array(text)?;
        match label(&parts)? {
            "EVENT" => Ok(ClientMessage::Event(event_at(&parts, 1)?)),
            "REQ" => {
                let subscription_id = string_at(&parts, 1)?;
                let filters = parts[2..]
                    .iter()
                    .map(|v| serde_json::from_value(v.clone()).map_err(protocol))
                    .collect::<Result<Vec<Filter>, _>>()?;
                Ok(ClientMessage::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(ClientMessage::Close(string_at(&parts, 1)?)),
            other => Err(RelayError::Protocol(format!("unknown client message {other:?}"))),
        }
    }
}

impl RelayMessage {
    pub fn from_json(text: &str) -> Result<Self, RelayError> {
        let parts = array(text)?;
        match label(&parts)? {
            "OK" => Ok(RelayMessage::Ok {
                event_id: string_at(&parts, 1)?,
                accepted: parts
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RelayError::Protocol("OK without status".into()))?,
                message: parts
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "EVENT" => Ok(RelayMessage::Event {
                subscription_id: string_at(&parts, 1)?,
                event: event_at(&parts, 2)?,
            }),
            "EOSE" => Ok(RelayMessage::Eose(string_at(&parts, 1)?)),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(&parts, 1)?,
                message: parts
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice(string_at(&parts, 1)?)),
            other => Err(RelayError::Protocol(format!("unknown relay message {other:?}"))),
        }
    }

    pub fn to_json(&self) -> Result<String, RelayError> {
        let value = match self {
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            RelayMessage::Eose(id) => json!(["EOSE", id]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            RelayMessage::Notice(message) => json!(["NOTICE", message]),
        };
        serde_json::to_string(&value).map_err(protocol)
    }
}

fn protocol(e: serde_json::Error) -> RelayError {
    RelayError::Protocol(e.to_string())
}

fn array(text: &str) -> Result<Vec<Value>, RelayError> {
    match serde_json::from_str::<Value>(text).map_err(protocol)? {
        Value::Array(parts) if !parts.is_empty() => Ok(parts),
        _ => Err(RelayError::Protocol("frame is not a non-empty array".into())),
    }
}

fn label(parts: &[Value]) -> Result<&str, RelayError> {
    parts[0]
        .as_str()
        .ok_or_else(|| RelayError::Protocol("frame label is not a string".into()))
}

fn string_at(parts: &[Value], i: usize) -> Result<String, RelayError> {
    parts
        .get(i)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RelayError::Protocol(format!("missing string at position {i}")))
}

fn event_at(parts: &[Value], i: usize) -> Result<SignedEvent, RelayError> {
    let v = parts
        .get(i)
        .cloned()
        .ok_or_else(|| RelayError::Protocol(format!("missing event at position {i}")))?;
    serde_json::from_value(v).map_err(protocol)
}
