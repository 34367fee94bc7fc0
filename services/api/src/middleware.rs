//! Session authentication middleware
//!
//! The session token is read from the `session` cookie, or from an
//! `Authorization: Bearer` header for non-browser clients, and resolved to a
//! user id through Redis.

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};
use tracing::error;

use crate::{error::ApiError, state::AppState};

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    /// Token the request was authenticated with
    pub token: String,
}

/// Session token carried by a request, cookie first
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_string));

    from_cookie
        .or_else(|| {
            headers
                .typed_get::<Authorization<Bearer>>()
                .map(|auth| auth.token().to_string())
        })
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers()).ok_or(ApiError::Unauthorized)?;

    let user_id = state
        .sessions
        .session_user(&token)
        .await
        .map_err(|e| {
            error!("Failed to resolve session: {}", e);
            ApiError::ServiceUnavailable("session store".to_string())
        })?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser { id: user_id, token });

    Ok(next.run(req).await)
}
