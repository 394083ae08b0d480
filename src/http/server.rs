//! HTTP server setup and the proxy dispatch handler.
//!
//! The router mounts, in priority order: the stats and robots endpoints,
//! the admin surface, and a catch-all route that dispatches everything
//! else through the matcher and the streaming forwarder.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::admin::admin_router;
use crate::error::ForwardError;
use crate::http::ratelimit::RateLimiter;
use crate::proxy::Forwarder;
use crate::registry::MappingRegistry;
use crate::routing::split_path;
use crate::stats::Collector;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn MappingRegistry>,
    pub forwarder: Arc<Forwarder>,
    /// Present only when statistics are enabled.
    pub collector: Option<Arc<Collector>>,
    /// Shared admin secret. `None` disables the admin surface.
    pub admin_token: Option<Arc<str>>,
    /// Present only when a rate limit is configured.
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: build_router(state),
        }
    }

    /// Serve until `shutdown` resolves, then drain gracefully.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/robots.txt", get(robots_handler))
        .route("/", any(proxy_handler))
        .route("/{*path}", any(proxy_handler))
        .with_state(state.clone())
        .merge(admin_router(state))
        .layer(TraceLayer::new_for_http())
}

/// Catch-all handler: match the path against the registry's prefixes and
/// forward.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        if !limiter.allow() {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Rate limit exceeded" })),
            )
                .into_response();
        }
    }

    let path = request.uri().path().to_string();
    let prefixes = state.registry.prefixes();
    let Some((prefix, residual)) = split_path(&path, prefixes.iter().map(String::as_str)) else {
        // No observer notification: only configured endpoints are counted.
        return no_mapping_response(&path);
    };

    match state
        .forwarder
        .forward(request, prefix, &residual, None)
        .await
    {
        Ok(response) => response,
        Err(err) => forward_error_response(err, &path),
    }
}

fn no_mapping_response(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "hint": "no mapping matches this path",
            "path": path,
        })),
    )
        .into_response()
}

fn forward_error_response(err: ForwardError, path: &str) -> Response {
    match err {
        ForwardError::MappingAbsent(_) => no_mapping_response(path),
        ForwardError::DeadlineExceeded => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": "upstream deadline exceeded" })),
        )
            .into_response(),
        ForwardError::Upstream(err) => {
            warn!(path, error = %err, "upstream request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "upstream request failed" })),
            )
                .into_response()
        }
        err => {
            warn!(path, error = %err, "forwarding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "proxy error" })),
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    match &state.collector {
        Some(collector) => Json(collector.snapshot()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "statistics are disabled" })),
        )
            .into_response(),
    }
}

async fn robots_handler() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /\n",
    )
        .into_response()
}
