//! Server-side presence tracking and broadcast.
//!
//! A user is online exactly while the connection registry holds a binding for
//! them. The last-seen time is refreshed on every register and deregister and
//! kept after the user goes offline so status lookups can report it.
//!
//! Connecting and disconnecting the same user are serialized by a striped
//! lifecycle lock, so a teardown never overlaps a re-register of that user.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::proto::server::{UserStatus, UserStatusReply};
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    registry: ConnectionRegistry,
    /// user_id -> last register/deregister time
    last_seen: Arc<DashMap<String, DateTime<Utc>>>,
    lifecycle: Arc<Vec<Mutex<()>>>,
}

const LIFECYCLE_STRIPES: usize = 64;

impl PresenceTracker {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            last_seen: Arc::new(DashMap::new()),
            lifecycle: Arc::new((0..LIFECYCLE_STRIPES).map(|_| Mutex::new(())).collect()),
        }
    }

    /// Held across a whole connect or disconnect of `user_id`.
    pub fn lifecycle_lock(&self, user_id: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let stripe = &self.lifecycle[hasher.finish() as usize % self.lifecycle.len()];
        stripe.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind the user to `handle` and broadcast that they are online, the new
    /// connection included. Returns the displaced connection, if any.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id();
        let displaced = self.registry.bind(user_id, handle);
        self.last_seen.insert(user_id.to_string(), Utc::now());

        if let Some(previous) = &displaced {
            tracing::info!(
                user_id = %user_id,
                displaced = %previous.id(),
                connection = %connection_id,
                "User re-registered, previous connection no longer routed"
            );
        }

        broadcast_to_all(
            &self.registry,
            &ServerEvent::UserStatus(UserStatus {
                user_id: user_id.to_string(),
                is_online: true,
                last_seen: None,
            }),
        );

        displaced
    }

    /// Remove the user's binding if it still belongs to `connection_id`.
    /// Returns the recorded last-seen time when the user actually went offline.
    /// Does not broadcast; see [`PresenceTracker::announce_offline`].
    pub fn deregister(&self, user_id: &str, connection_id: uuid::Uuid) -> Option<DateTime<Utc>> {
        if !self.registry.unbind(user_id, connection_id) {
            return None;
        }
        let now = Utc::now();
        self.last_seen.insert(user_id.to_string(), now);
        Some(now)
    }

    pub fn announce_offline(&self, user_id: &str, last_seen: DateTime<Utc>) {
        broadcast_to_all(
            &self.registry,
            &ServerEvent::UserStatus(UserStatus {
                user_id: user_id.to_string(),
                is_online: false,
                last_seen: Some(last_seen),
            }),
        );
    }

    /// Current presence of a user. Online users report "now" as last seen.
    pub fn query_status(&self, user_id: &str) -> UserStatusReply {
        let is_online = self.registry.is_online(user_id);
        let last_seen = if is_online {
            Some(Utc::now())
        } else {
            self.last_seen.get(user_id).map(|entry| *entry.value())
        };

        UserStatusReply {
            user_id: user_id.to_string(),
            is_online,
            last_seen,
        }
    }
}

// --- Functions called from WS actor lifecycle ---

/// Register a user on a connection.
pub fn connect_user(state: &AppState, user_id: &str, handle: ConnectionHandle) {
    let _lifecycle = state.presence.lifecycle_lock(user_id);
    state.presence.register(user_id, handle);
    tracing::info!(
        user_id = %user_id,
        online = state.connections.len(),
        "User connected"
    );
}

/// Tear down everything a user owns once their live connection goes away:
/// typing timers, non-terminal calls, and finally the offline broadcast.
/// A connection that was already displaced by a newer one changes nothing.
pub fn disconnect_user(state: &AppState, user_id: &str, handle: &ConnectionHandle) {
    let _lifecycle = state.presence.lifecycle_lock(user_id);
    let Some(last_seen) = state.presence.deregister(user_id, handle.id()) else {
        tracing::debug!(
            user_id = %user_id,
            connection = %handle.id(),
            "Displaced connection closed, binding left intact"
        );
        return;
    };
    release_user(state, user_id, last_seen);
}

/// Clear typing, calls and announce offline for a user whose binding was
/// just removed. Does nothing if the user is already bound again.
fn release_user(state: &AppState, user_id: &str, last_seen: DateTime<Utc>) -> bool {
    if state.connections.is_online(user_id) {
        tracing::debug!(user_id = %user_id, "User came back before teardown, kept");
        return false;
    }

    state.typing.clear_user(user_id);
    state.calls.drop_participant(user_id);
    state.presence.announce_offline(user_id, last_seen);

    tracing::info!(user_id = %user_id, "User disconnected");
    true
}

// --- REST endpoint handlers ---

/// GET /internal/presence/{user_id}
/// Reachability answer consulted by the message write path.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<UserStatusReply> {
    Json(state.presence.query_status(&user_id))
}
