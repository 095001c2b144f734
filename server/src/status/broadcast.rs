//! Fan-out of ephemeral "status" (story) events.
//!
//! Statuses are persisted elsewhere; this only pushes create/delete events to
//! whoever is connected right now and tells owners about first views. Users
//! that are offline at broadcast time pick changes up from the next full fetch.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::proto::server::StatusViewed;
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::ws::broadcast::{broadcast_except, send_to_user};
use crate::ws::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    registry: ConnectionRegistry,
}

impl StatusBroadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Push a new status to every connected user except its author.
    pub fn broadcast_created(&self, status: Value, author_id: &str) -> usize {
        let reached = broadcast_except(&self.registry, author_id, &ServerEvent::NewStatus(status));
        tracing::debug!(author_id = %author_id, reached = reached, "Status created");
        reached
    }

    /// Push a status deletion to every connected user except its author.
    pub fn broadcast_deleted(&self, status_id: &str, author_id: &str) -> usize {
        broadcast_except(
            &self.registry,
            author_id,
            &ServerEvent::StatusDeleted(status_id.to_string()),
        )
    }

    /// Tell the owner someone viewed their status. The caller only invokes
    /// this for a viewer's first view; no deduplication happens here.
    pub fn notify_viewed(&self, viewed: StatusViewed, owner_id: &str) -> bool {
        send_to_user(&self.registry, owner_id, &ServerEvent::StatusViewed(viewed))
    }
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequest {
    pub status: Value,
    pub author_id: String,
}

/// POST /internal/statuses
pub async fn post_status(
    State(state): State<AppState>,
    Json(body): Json<CreatedRequest>,
) -> Json<Value> {
    let reached = state.statuses.broadcast_created(body.status, &body.author_id);
    Json(serde_json::json!({ "reached": reached }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRequest {
    pub author_id: String,
}

/// DELETE /internal/statuses/{status_id}
pub async fn delete_status(
    State(state): State<AppState>,
    Path(status_id): Path<String>,
    Json(body): Json<DeletedRequest>,
) -> StatusCode {
    state.statuses.broadcast_deleted(&status_id, &body.author_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewedRequest {
    pub viewer_id: String,
    pub owner_id: String,
    pub total_viewers: u64,
    #[serde(default)]
    pub viewers: Vec<Value>,
}

/// POST /internal/statuses/{status_id}/viewed
pub async fn post_status_viewed(
    State(state): State<AppState>,
    Path(status_id): Path<String>,
    Json(body): Json<ViewedRequest>,
) -> StatusCode {
    state.statuses.notify_viewed(
        StatusViewed {
            status_id,
            viewer_id: body.viewer_id,
            total_viewers: body.total_viewers,
            viewers: body.viewers,
        },
        &body.owner_id,
    );
    StatusCode::NO_CONTENT
}
