use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;

/// Middleware that validates the `Authorization: Bearer <token>` header
/// against the configured admin token.
///
/// - If no admin token is configured, returns 404 (hides the endpoint entirely).
/// - If the token is missing or wrong, returns 401.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(req).await,
        _ => {
            tracing::warn!(path = %req.uri().path(), "Rejected admin request");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
