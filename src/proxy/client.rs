//! Shared upstream HTTP client.
//!
//! One pooled client serves every forwarded request. Transparency rules:
//! no overall request timeout and no response-header timeout (the client
//! or the guard deadline governs), and no automatic decompression; the
//! proxy never touches the body's encoding.

use std::time::Duration;

use axum::body::Body;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Pooled client type shared across all in-flight forwards.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Idle upstream connections are closed after this long.
pub const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
/// Cap on pooled idle connections per upstream host.
pub const MAX_IDLE_CONNS_PER_HOST: usize = 10;

/// Build the shared pooled client (plain and TLS upstreams).
pub fn build_client() -> UpstreamClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(IDLE_CONN_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
        .build(HttpsConnector::new())
}
