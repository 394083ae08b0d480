//! Session-cookie authentication for the admin surface.
//!
//! The session cookie carries the shared admin secret; the middleware
//! compares it against the configured token in constant time. With no
//! token configured the whole surface answers 503.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::http::server::AppState;

/// Name of the admin session cookie.
pub const SESSION_COOKIE: &str = "api_proxy_admin";

const SESSION_TTL_SECS: u64 = 12 * 60 * 60;

/// Constant-time token equality.
pub fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Extract the session token from the request's cookies, if present.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(SESSION_COOKIE) {
                if let Some(value) = value.strip_prefix('=') {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={SESSION_TTL_SECS}"
    ))
    .ok()
}

/// `Set-Cookie` value clearing the session.
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("api_proxy_admin=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// 503 response used whenever the admin surface is disabled.
pub fn admin_disabled() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "Admin functionality is disabled (ADMIN_TOKEN not set)" })),
    )
        .into_response()
}

/// Middleware gating the mapping CRUD group.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return admin_disabled();
    };

    match session_token(request.headers()) {
        Some(token) if token_matches(&token, expected) => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid admin token" })),
        )
            .into_response(),
    }
}
