//! Events pushed by the relay to clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::chat::messages::MessageStatus;
use crate::chat::reactions::Reaction;
use crate::proto::client::SignalPayload;

/// Outbound event, tagged by `event` with its payload under `data`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserStatus(UserStatus),
    ReceiveMessage(Value),
    MessageStatusUpdate(MessageStatusUpdate),
    UserTyping(UserTyping),
    ReactionUpdate(ReactionUpdate),
    /// Carries the deleted message id.
    MessageDeleted(String),
    NewStatus(Value),
    /// Carries the deleted status id.
    StatusDeleted(String),
    StatusViewed(StatusViewed),
    IncomingCall(IncomingCall),
    CallAccepted(CallAccepted),
    CallRejected(CallRef),
    CallEnded(CallRef),
    CallFailed(CallFailed),
    WebrtcOffer(RelayedSignal),
    WebrtcAnswer(RelayedSignal),
    WebrtcIceCandidate(RelayedSignal),
}

/// Presence of a single user. `lastSeen` is omitted for online broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: String,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Reply to `get_user_status`. Unlike the broadcast, `lastSeen` is always
/// present and is `null` for users never seen by this process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusReply {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdate {
    pub message_id: String,
    pub message_status: MessageStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: String,
    pub conversation_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub message_id: String,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusViewed {
    pub status_id: String,
    pub viewer_id: String,
    pub total_viewers: u64,
    pub viewers: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: Option<String>,
    pub caller_avatar: Option<String>,
    pub call_type: String,
}

/// Sent to the caller once the receiver picks up. Name and avatar are the
/// receiver's, kept under the `caller*` keys clients already read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccepted {
    pub call_id: String,
    pub caller_name: Option<String>,
    pub caller_avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRef {
    pub call_id: String,
}

/// `callId` is present only when a ringing call timed out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFailed {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Outbound signaling frame: the inbound payload plus the sender's id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    #[serde(flatten)]
    pub payload: SignalPayload,
    pub sender_id: String,
    pub call_id: String,
}

impl ServerEvent {
    /// Wire name of the event, used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserStatus(_) => "user_status",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageStatusUpdate(_) => "message_status_update",
            Self::UserTyping(_) => "user_typing",
            Self::ReactionUpdate(_) => "reaction_update",
            Self::MessageDeleted(_) => "message_deleted",
            Self::NewStatus(_) => "new_status",
            Self::StatusDeleted(_) => "status_deleted",
            Self::StatusViewed(_) => "status_viewed",
            Self::IncomingCall(_) => "incoming_call",
            Self::CallAccepted(_) => "call_accepted",
            Self::CallRejected(_) => "call_rejected",
            Self::CallEnded(_) => "call_ended",
            Self::CallFailed(_) => "call_failed",
            Self::WebrtcOffer(_) => "webrtc_offer",
            Self::WebrtcAnswer(_) => "webrtc_answer",
            Self::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
        }
    }

    /// Wrap a relayed signal in the event matching its payload kind.
    pub fn signal(signal: RelayedSignal) -> Self {
        match signal.payload {
            SignalPayload::Offer(_) => Self::WebrtcOffer(signal),
            SignalPayload::Answer(_) => Self::WebrtcAnswer(signal),
            SignalPayload::Candidate(_) => Self::WebrtcIceCandidate(signal),
        }
    }
}
