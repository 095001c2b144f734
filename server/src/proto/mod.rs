//! JSON event frames exchanged over the relay WebSocket.
//!
//! Every frame is a text message of the form
//! `{"event": "<name>", "data": <payload>, "ack": <n>}` where `ack` is only
//! present on requests that expect a reply. Replies to such requests are sent
//! back as `{"event": "ack", "ack": <n>, "data": <reply>}`.

pub mod client;
pub mod server;

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::ClientEvent;
pub use server::ServerEvent;

/// Errors produced while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no `event` field")]
    MissingEvent,

    #[error("malformed `{event}` payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub event: ClientEvent,
    /// Acknowledgement id for request/response style events.
    pub ack: Option<u64>,
}

/// Decode a text frame into a client event.
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    let mut value: Value = serde_json::from_str(text)?;

    let event_name = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingEvent)?
        .to_string();
    let ack = value
        .as_object_mut()
        .and_then(|frame| frame.remove("ack"))
        .and_then(|ack| ack.as_u64());

    let event = ClientEvent::deserialize(value).map_err(|source| ProtocolError::Payload {
        event: event_name,
        source,
    })?;

    Ok(Inbound { event, ack })
}

/// Encode a server event as a text WebSocket message.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Encode the reply to an acknowledged request.
pub fn encode_ack<T: Serialize>(ack: u64, data: &T) -> Option<Message> {
    #[derive(Serialize)]
    struct AckFrame<'a, T> {
        event: &'static str,
        ack: u64,
        data: &'a T,
    }

    match serde_json::to_string(&AckFrame {
        event: "ack",
        ack,
        data,
    }) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(ack = ack, error = %e, "Failed to encode ack frame");
            None
        }
    }
}
