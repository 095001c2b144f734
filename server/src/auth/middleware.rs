use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// Extract a bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Guard for the internal collaborator hooks. When an internal token is
/// configured, requests must present it as a bearer token.
pub async fn require_internal_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.internal_token.as_deref() {
        match bearer_token(req.headers()) {
            Some(token) if token == expected => {}
            _ => {
                tracing::warn!(path = %req.uri().path(), "Internal hook call rejected");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(req).await)
}
