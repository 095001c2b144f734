pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::proto::{self, ServerEvent};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Handle to a live connection: its transport-assigned id plus the outbound
/// channel drained by the connection's writer task (FIFO per connection).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a raw message. Never blocks; returns false if the writer is gone.
    pub fn send_message(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Encode and queue a server event.
    pub fn send(&self, event: &ServerEvent) -> bool {
        match proto::encode(event) {
            Some(msg) => self.send_message(msg),
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Connection registry: maps each user to the one connection that currently
/// receives their events. Registering again replaces the previous binding.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    bindings: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`, returning the displaced connection if a
    /// different one was bound before.
    pub fn bind(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let new_id = handle.id();
        self.bindings
            .insert(user_id.to_string(), handle)
            .filter(|previous| previous.id() != new_id)
    }

    /// Remove the binding for `user_id`, but only while it still points at
    /// `connection_id`. A connection displaced by a newer registration
    /// cannot unbind its successor.
    pub fn unbind(&self, user_id: &str, connection_id: Uuid) -> bool {
        self.bindings
            .remove_if(user_id, |_, handle| handle.id() == connection_id)
            .is_some()
    }

    /// Resolve the connection currently bound to `user_id`.
    pub fn route_to(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.bindings.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.bindings.contains_key(user_id)
    }

    /// Copy of every binding, taken so callers can emit without holding shard locks.
    pub fn snapshot(&self) -> Vec<(String, ConnectionHandle)> {
        self.bindings
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
