//! Admin request handlers.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::admin::auth;
use crate::error::RegistryError;
use crate::http::server::AppState;
use crate::registry::MappingRegistry;

#[derive(Debug, Deserialize)]
pub struct MappingRequest {
    pub prefix: String,
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

/// `GET /api/mappings`: full mapping set plus the registry version.
pub async fn list_mappings(State(state): State<AppState>) -> Response {
    let mappings = state.registry.snapshot();
    Json(json!({
        "success": true,
        "count": mappings.len(),
        "mappings": mappings,
        "version": state.registry.version(),
    }))
    .into_response()
}

/// `GET /api/public/mappings`: unauthenticated read-only view.
pub async fn public_mappings(State(state): State<AppState>) -> Response {
    let mappings = state.registry.snapshot();
    Json(json!({
        "success": true,
        "count": mappings.len(),
        "mappings": mappings,
    }))
    .into_response()
}

/// `POST /api/mappings`: create a mapping.
pub async fn add_mapping(
    State(state): State<AppState>,
    Json(req): Json<MappingRequest>,
) -> Response {
    match state.registry.add(&req.prefix, &req.target).await {
        Ok(()) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Mapping added successfully",
                "mapping": { "prefix": req.prefix, "target": req.target },
            })),
        )
            .into_response(),
        Err(err) => registry_error_response(err),
    }
}

/// `PUT /api/mappings/{*prefix}`: update an existing mapping.
pub async fn update_mapping(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Json(req): Json<TargetRequest>,
) -> Response {
    let prefix = match normalize_prefix_param(&prefix) {
        Ok(prefix) => prefix,
        Err(response) => return response,
    };

    match state.registry.update(&prefix, &req.target).await {
        Ok(()) => Json(json!({
            "success": true,
            "message": "Mapping updated successfully",
            "mapping": { "prefix": prefix, "target": req.target },
        }))
        .into_response(),
        Err(err) => registry_error_response(err),
    }
}

/// `DELETE /api/mappings/{*prefix}`: remove a mapping.
pub async fn delete_mapping(State(state): State<AppState>, Path(prefix): Path<String>) -> Response {
    let prefix = match normalize_prefix_param(&prefix) {
        Ok(prefix) => prefix,
        Err(response) => return response,
    };

    match state.registry.delete(&prefix).await {
        Ok(()) => Json(json!({
            "success": true,
            "message": "Mapping deleted successfully",
            "prefix": prefix,
        }))
        .into_response(),
        Err(err) => registry_error_response(err),
    }
}

/// `POST /api/mappings/reload`: unconditional reload from the KV store.
pub async fn reload_mappings(State(state): State<AppState>) -> Response {
    match state.registry.force_reload().await {
        Ok(()) => Json(json!({
            "message": "Mappings reloaded successfully",
            "version": state.registry.version(),
        }))
        .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to reload mappings: {err}") })),
        )
            .into_response(),
    }
}

/// `POST /api/admin/login`: verify the token and set the session cookie.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return auth::admin_disabled();
    };

    if !auth::token_matches(&req.token, expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid token" })),
        )
            .into_response();
    }

    let Some(cookie) = auth::session_cookie(&req.token) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Token contains characters not allowed in a cookie" })),
        )
            .into_response();
    };

    (
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true, "message": "Authentication successful" })),
    )
        .into_response()
}

/// `POST /api/admin/logout`: clear the session cookie.
pub async fn logout() -> Response {
    (
        [(header::SET_COOKIE, auth::clear_session_cookie())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

/// The wildcard parameter is the whole suffix after `/api/mappings/`;
/// restore the leading `/` the router swallowed so multi-segment prefixes
/// like `/api/v1` round-trip.
fn normalize_prefix_param(raw: &str) -> Result<String, Response> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "prefix parameter is required" })),
        )
            .into_response());
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

fn registry_error_response(err: RegistryError) -> Response {
    let status = match &err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists(_) | RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::ReloadTimeout(_) | RegistryError::Kv(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
