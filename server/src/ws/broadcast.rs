use crate::proto::{self, ServerEvent};
use super::ConnectionRegistry;

/// Broadcast an event to all connected users.
/// Returns the number of connections the event was queued on.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) -> usize {
    broadcast_filtered(registry, event, |_| true)
}

/// Broadcast an event to every connected user except `excluded_user_id`.
pub fn broadcast_except(
    registry: &ConnectionRegistry,
    excluded_user_id: &str,
    event: &ServerEvent,
) -> usize {
    broadcast_filtered(registry, event, |user_id| user_id != excluded_user_id)
}

fn broadcast_filtered(
    registry: &ConnectionRegistry,
    event: &ServerEvent,
    include: impl Fn(&str) -> bool,
) -> usize {
    let Some(msg) = proto::encode(event) else {
        return 0;
    };

    // Snapshot first: no shard lock is held while queueing.
    registry
        .snapshot()
        .into_iter()
        .filter(|(user_id, _)| include(user_id))
        .filter(|(_, handle)| handle.send_message(msg.clone()))
        .count()
}

/// Send an event to a specific user if they are reachable.
/// Returns false when the user has no live connection.
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) -> bool {
    match registry.route_to(user_id) {
        Some(handle) => handle.send(event),
        None => {
            tracing::trace!(
                user_id = %user_id,
                event = event.name(),
                "Target unreachable, dropping event"
            );
            false
        }
    }
}
