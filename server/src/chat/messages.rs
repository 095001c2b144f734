//! Message relay: new-message forwarding, delivery/read status updates,
//! reactions and deletion notices between the two parties of a conversation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::chat::reactions::{toggle_reaction, Reaction};
use crate::proto::client::StatusAck;
use crate::proto::server::{MessageStatusUpdate, ReactionUpdate};
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::store::retention::Retention;
use crate::store::{MessageStore, Participants};
use crate::ws::broadcast::send_to_user;
use crate::ws::ConnectionRegistry;

/// Delivery status of a message. Ordered: a status is only ever forwarded if
/// it is ahead of the last one forwarded for the same message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy)]
struct Forwarded {
    status: MessageStatus,
    touched: Instant,
}

#[derive(Clone)]
pub struct MessageRelay {
    registry: ConnectionRegistry,
    store: Arc<dyn MessageStore>,
    /// message_id -> highest status forwarded so far
    ledger: Arc<DashMap<String, Forwarded>>,
    retention: Arc<Retention>,
}

impl MessageRelay {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn MessageStore>,
        retention: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            ledger: Arc::new(DashMap::new()),
            retention: Arc::new(Retention::new(retention)),
        }
    }

    /// Forward a persisted message to its receiver.
    /// Returns whether the receiver was reachable; the write path uses this
    /// to decide between `sent` and `delivered` as the initial status.
    pub fn forward_new_message(&self, message: Value) -> bool {
        let Some(receiver_id) = message_party(&message, "receiver") else {
            tracing::warn!("Message without receiver, not relayed");
            return false;
        };
        let message_id = message_id(&message);

        if let (Some(id), Some(sender_id)) = (&message_id, message_party(&message, "sender")) {
            self.store.record_participants(
                id,
                Participants {
                    sender_id,
                    receiver_id: receiver_id.clone(),
                },
            );
        }

        let delivered = send_to_user(
            &self.registry,
            &receiver_id,
            &ServerEvent::ReceiveMessage(message),
        );

        if let Some(id) = message_id {
            let status = if delivered {
                MessageStatus::Delivered
            } else {
                MessageStatus::Sent
            };
            self.advance(&id, status, || true);
        }

        delivered
    }

    /// Tell the sender their messages were read, in input order.
    pub fn mark_read(&self, message_ids: &[String], sender_id: &str) -> usize {
        self.relay_status(message_ids, sender_id, MessageStatus::Read)
    }

    /// Forward a status transition for each message to its sender. Messages
    /// whose forwarded status is already at or past `status` are skipped.
    /// A status is only recorded once it was queued to the sender.
    pub fn relay_status(
        &self,
        message_ids: &[String],
        sender_id: &str,
        status: MessageStatus,
    ) -> usize {
        let Some(sender) = self.registry.route_to(sender_id) else {
            return 0;
        };

        let mut forwarded = 0;
        for message_id in message_ids {
            let event = ServerEvent::MessageStatusUpdate(MessageStatusUpdate {
                message_id: message_id.clone(),
                message_status: status,
            });
            if self.advance(message_id, status, || sender.send(&event)) {
                forwarded += 1;
            }
        }
        forwarded
    }

    /// Toggle a user's reaction and push the new list to both parties.
    pub fn apply_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        sender_id: &str,
        receiver_id: &str,
    ) -> Vec<Reaction> {
        if self.store.participants(message_id).is_none() {
            self.store.record_participants(
                message_id,
                Participants {
                    sender_id: sender_id.to_string(),
                    receiver_id: receiver_id.to_string(),
                },
            );
        }
        let reactions = self
            .store
            .update_reactions(message_id, &mut |reactions| {
                toggle_reaction(reactions, user_id, emoji);
            })
            .unwrap_or_default();

        let event = ServerEvent::ReactionUpdate(ReactionUpdate {
            message_id: message_id.to_string(),
            reactions: reactions.clone(),
        });
        send_to_user(&self.registry, sender_id, &event);
        if receiver_id != sender_id {
            send_to_user(&self.registry, receiver_id, &event);
        }

        reactions
    }

    /// Resolve the parties of a known message.
    pub fn participants(&self, message_id: &str) -> Option<Participants> {
        self.store.participants(message_id)
    }

    /// Tell the receiver a message is gone.
    pub fn notify_deleted(&self, message_id: &str, receiver_id: &str) -> bool {
        self.ledger.remove(message_id);
        self.store.forget(message_id);
        send_to_user(
            &self.registry,
            receiver_id,
            &ServerEvent::MessageDeleted(message_id.to_string()),
        )
    }

    pub fn forwarded_status(&self, message_id: &str) -> Option<MessageStatus> {
        self.ledger.get(message_id).map(|entry| entry.status)
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }

    /// Drop ledger entries not advanced within the retention window.
    pub fn sweep(&self) {
        self.ledger
            .retain(|_, forwarded| self.retention.is_fresh(forwarded.touched));
    }

    /// Record `status` if it is ahead of the current one and `deliver`
    /// succeeds. `deliver` runs under the entry guard so two relays of the
    /// same transition cannot both emit.
    fn advance(
        &self,
        message_id: &str,
        status: MessageStatus,
        deliver: impl FnOnce() -> bool,
    ) -> bool {
        let advanced = match self.ledger.entry(message_id.to_string()) {
            Entry::Occupied(mut current) => {
                if current.get().status >= status || !deliver() {
                    false
                } else {
                    current.insert(Forwarded {
                        status,
                        touched: Instant::now(),
                    });
                    true
                }
            }
            Entry::Vacant(slot) => {
                if !deliver() {
                    false
                } else {
                    slot.insert(Forwarded {
                        status,
                        touched: Instant::now(),
                    });
                    true
                }
            }
        };

        if advanced && self.retention.record_write() {
            self.sweep();
        }
        advanced
    }
}

/// Message id under `_id` or `id`.
fn message_id(message: &Value) -> Option<String> {
    ["_id", "id"]
        .iter()
        .find_map(|key| message.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// User id of a message party (`"receiver"` or `"sender"`), accepting
/// `receiverId`, a bare `receiver` id, or a populated `receiver` object.
fn message_party(message: &Value, role: &str) -> Option<String> {
    let id = match message.get(format!("{}Id", role)).and_then(Value::as_str) {
        Some(id) => Some(id.to_string()),
        None => match message.get(role)? {
            Value::String(id) => Some(id.clone()),
            Value::Object(party) => ["_id", "id"]
                .iter()
                .find_map(|key| party.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        },
    };
    id.filter(|id| !id.is_empty())
}

// --- REST endpoint handlers ---

#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub delivered: bool,
}

/// POST /internal/messages
/// Body: the persisted message object. Responds with the reachability answer.
pub async fn post_message(
    State(state): State<AppState>,
    Json(message): Json<Value>,
) -> Result<Json<ForwardResponse>, (StatusCode, String)> {
    if message_party(&message, "receiver").is_none() {
        return Err((StatusCode::BAD_REQUEST, "Message has no receiver".to_string()));
    }
    let delivered = state.messages.forward_new_message(message);
    Ok(Json(ForwardResponse { delivered }))
}

/// POST /internal/messages/read
/// Body: `{ "messageIds": [...], "senderId": "..." }`
pub async fn post_messages_read(
    State(state): State<AppState>,
    Json(body): Json<StatusAck>,
) -> StatusCode {
    state.store.mark_read(&body.message_ids);
    state.messages.mark_read(&body.message_ids, &body.sender_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRequest {
    pub receiver_id: String,
}

/// POST /internal/messages/{message_id}/deleted
/// Sender-only authorization has already been enforced by the caller.
pub async fn post_message_deleted(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Json(body): Json<DeletedRequest>,
) -> StatusCode {
    state.messages.notify_deleted(&message_id, &body.receiver_id);
    StatusCode::NO_CONTENT
}
