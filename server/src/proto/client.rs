//! Events sent by clients to the relay.

use serde::Deserialize;
use serde_json::Value;

/// Inbound event, tagged by `event` with its payload under `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Binds the connection to a user id.
    UserConnected(String),
    /// Presence lookup for a user id, answered only to the requester.
    GetUserStatus(String),
    /// Direct relay of an already persisted message object.
    SendMessage(Value),
    MessageRead(StatusAck),
    MessageDelivered(StatusAck),
    TypingStart(Typing),
    TypingStop(Typing),
    AddReaction(AddReaction),
    InitiateCall(InitiateCall),
    AcceptCall(AcceptCall),
    RejectCall(RejectCall),
    EndCall(EndCall),
    WebrtcOffer(Signal),
    WebrtcAnswer(Signal),
    WebrtcIceCandidate(Signal),
}

/// Read/delivered acknowledgement for a batch of messages from one sender.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAck {
    pub message_ids: Vec<String>,
    pub sender_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub conversation_id: String,
    pub receiver_id: String,
}

/// Reaction toggle. Sender and receiver are looked up from the message store
/// when the client does not supply them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReaction {
    pub message_id: String,
    pub emoji: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
}

/// Display details of a call party.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyInfo {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCall {
    pub caller_id: String,
    pub receiver_id: String,
    pub call_type: String,
    #[serde(default)]
    pub caller_info: PartyInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCall {
    pub caller_id: String,
    pub call_id: String,
    #[serde(default)]
    pub receiver_info: PartyInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCall {
    pub caller_id: String,
    pub call_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCall {
    pub call_id: String,
    pub participant_id: String,
}

/// WebRTC signaling payload. Serialized under the key matching its kind:
/// `offer`, `answer` or `candidate`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPayload {
    Offer(Value),
    Answer(Value),
    Candidate(Value),
}

impl SignalPayload {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Offer(_) => SignalKind::Offer,
            Self::Answer(_) => SignalKind::Answer,
            Self::Candidate(_) => SignalKind::IceCandidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice_candidate",
        }
    }
}

/// Inbound signaling frame: `{offer|answer|candidate, receiverId, callId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    #[serde(flatten)]
    pub payload: SignalPayload,
    pub receiver_id: String,
    pub call_id: String,
}
