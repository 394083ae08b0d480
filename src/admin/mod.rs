//! Admin HTTP surface: mapping CRUD over the registry.

pub mod auth;
pub mod handlers;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use self::auth::admin_auth;
use self::handlers::*;
use crate::http::server::AppState;

/// Build the admin router: login/logout, the public read endpoint, and the
/// token-gated mapping CRUD group.
pub fn admin_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/mappings", get(list_mappings).post(add_mapping))
        .route("/api/mappings/reload", post(reload_mappings))
        .route(
            "/api/mappings/{*prefix}",
            put(update_mapping).delete(delete_mapping),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/api/admin/login", post(login))
        .route("/api/admin/logout", post(logout))
        .route("/api/public/mappings", get(public_mappings))
        .merge(protected)
        .with_state(state)
}
