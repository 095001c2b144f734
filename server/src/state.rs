use std::sync::Arc;
use std::time::Duration;

use crate::call::CallSignalingRelay;
use crate::chat::messages::MessageRelay;
use crate::chat::presence::PresenceTracker;
use crate::chat::typing::TypingCoordinator;
use crate::config::Config;
use crate::status::StatusBroadcaster;
use crate::store::MessageStore;
use crate::ws::ConnectionRegistry;

/// WebSocket heartbeat timing.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Shared application state passed to all handlers via axum State extractor.
/// Every component shares the same connection registry.
#[derive(Clone)]
pub struct AppState {
    /// Live connection per user
    pub connections: ConnectionRegistry,
    pub presence: PresenceTracker,
    pub typing: TypingCoordinator,
    pub messages: MessageRelay,
    pub statuses: StatusBroadcaster,
    pub calls: CallSignalingRelay,
    /// Message store collaborator
    pub store: Arc<dyn MessageStore>,
    /// HS256 secret for WebSocket authentication, if enabled
    pub jwt_secret: Option<Vec<u8>>,
    /// Bearer token guarding the /internal hooks, if enabled
    pub internal_token: Option<String>,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn MessageStore>) -> Self {
        let connections = ConnectionRegistry::new();

        Self {
            presence: PresenceTracker::new(connections.clone()),
            typing: TypingCoordinator::new(connections.clone(), config.typing_timeout()),
            messages: MessageRelay::new(
                connections.clone(),
                store.clone(),
                config.message_retention(),
            ),
            statuses: StatusBroadcaster::new(connections.clone()),
            calls: CallSignalingRelay::new(connections.clone(), config.ring_timeout()),
            connections,
            store,
            jwt_secret: config
                .jwt_secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
            internal_token: config.internal_token.clone().filter(|t| !t.is_empty()),
            heartbeat: Heartbeat {
                ping_interval: config.ping_interval(),
                pong_timeout: config.pong_timeout(),
            },
        }
    }
}
