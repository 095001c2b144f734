use axum::{middleware, Router};

use crate::auth::middleware::require_internal_token;
use crate::chat::{messages, presence};
use crate::state::AppState;
use crate::status::broadcast as status_hooks;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Hooks called by the HTTP API after it has persisted a change.
    // Guarded by the internal bearer token when one is configured.
    let internal_routes = Router::new()
        .route(
            "/internal/presence/{user_id}",
            axum::routing::get(presence::get_presence),
        )
        .route("/internal/messages", axum::routing::post(messages::post_message))
        .route(
            "/internal/messages/read",
            axum::routing::post(messages::post_messages_read),
        )
        .route(
            "/internal/messages/{message_id}/deleted",
            axum::routing::post(messages::post_message_deleted),
        )
        .route("/internal/statuses", axum::routing::post(status_hooks::post_status))
        .route(
            "/internal/statuses/{status_id}",
            axum::routing::delete(status_hooks::delete_status),
        )
        .route(
            "/internal/statuses/{status_id}/viewed",
            axum::routing::post(status_hooks::post_status_viewed),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    // WebSocket endpoint (auth via query param or bearer header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(internal_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
