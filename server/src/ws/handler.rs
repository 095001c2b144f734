use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::{jwt, middleware::bearer_token};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token missing or invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. When a JWT secret is configured the token is
/// taken from the query string or an `Authorization: Bearer` header; on
/// failure the connection is upgraded and immediately closed with a code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(secret) = state.jwt_secret.clone() else {
        return ws.on_upgrade(move |socket| actor::run_connection(socket, state, None));
    };

    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();

    match jwt::validate_token(&secret, token) {
        Ok(claims) => {
            tracing::info!(user_id = %claims.user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, Some(claims.user_id)))
        }
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
