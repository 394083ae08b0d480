//! The per-request streaming forwarder.
//!
//! `forward` wires one client request to one upstream request: resolve the
//! target, assemble the URL by concatenation, copy end-to-end headers,
//! dispatch through the shared pooled client, and hand the upstream body
//! straight back. Bodies are passed by reference on both legs; nothing is
//! ever collected into memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use http::{Request, Response, Uri};
use tracing::debug;

use crate::error::{ForwardError, RegistryError};
use crate::proxy::client::{build_client, UpstreamClient};
use crate::proxy::headers::{copy_end_to_end, copy_request_headers};
use crate::proxy::relay::ObservedBody;
use crate::registry::MappingRegistry;
use crate::stats::Observer;

/// Resource-guard deadline applied when the caller supplies none. Not a
/// functional timeout: it only bounds resource retention when a client
/// disappears without closing the connection.
pub const GUARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming proxy engine shared by all request handlers.
pub struct Forwarder {
    client: UpstreamClient,
    registry: Arc<dyn MappingRegistry>,
    observer: Arc<dyn Observer>,
    guard_timeout: Duration,
}

impl Forwarder {
    pub fn new(registry: Arc<dyn MappingRegistry>, observer: Arc<dyn Observer>) -> Self {
        Self {
            client: build_client(),
            registry,
            observer,
            guard_timeout: GUARD_TIMEOUT,
        }
    }

    /// Forward `req` (already routed: `prefix` matched, `residual` split
    /// off) to its mapped target.
    ///
    /// `deadline` is the client-supplied deadline, if any; when absent the
    /// guard deadline applies. A caller deadline is never shortened.
    pub async fn forward(
        &self,
        req: Request<Body>,
        prefix: &str,
        residual: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Response<Body>, ForwardError> {
        let target = match self.registry.get(prefix).await {
            Ok(target) => target,
            Err(RegistryError::NotFound(_)) => {
                return Err(ForwardError::MappingAbsent(prefix.to_string()));
            }
            Err(err) => return Err(ForwardError::Registry(err)),
        };

        self.observer.request_started(prefix);
        let started = Instant::now();
        let deadline =
            deadline.unwrap_or_else(|| tokio::time::Instant::now() + self.guard_timeout);

        let (parts, body) = req.into_parts();

        // Plain concatenation against the validated target; no parsing or
        // normalization of the residual.
        let mut upstream_url = format!("{target}{residual}");
        if let Some(query) = parts.uri.query() {
            upstream_url.push('?');
            upstream_url.push_str(query);
        }
        let uri = match upstream_url.parse::<Uri>() {
            Ok(uri) => uri,
            Err(source) => {
                self.observer.request_failed(prefix);
                return Err(ForwardError::InvalidTarget {
                    url: upstream_url,
                    source,
                });
            }
        };

        let mut upstream_req = match Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(body)
        {
            Ok(req) => req,
            Err(err) => {
                self.observer.request_failed(prefix);
                return Err(ForwardError::Request(err));
            }
        };
        copy_request_headers(upstream_req.headers_mut(), &parts.headers);

        debug!(
            method = %parts.method,
            prefix,
            url = %upstream_url,
            "forwarding request"
        );

        let upstream_resp =
            match tokio::time::timeout_at(deadline, self.client.request(upstream_req)).await {
                Ok(Ok(resp)) => resp,
                Ok(Err(err)) => {
                    self.observer.request_failed(prefix);
                    return Err(ForwardError::Upstream(err));
                }
                Err(_) => {
                    self.observer.request_failed(prefix);
                    return Err(ForwardError::DeadlineExceeded);
                }
            };

        let failed_status = upstream_resp.status().as_u16() >= 400;
        let (up_parts, up_body) = upstream_resp.into_parts();

        let relay = ObservedBody::new(
            up_body,
            Arc::clone(&self.observer),
            prefix.to_string(),
            started,
            deadline,
            failed_status,
        );

        let mut response = Response::new(Body::new(relay));
        *response.status_mut() = up_parts.status;
        copy_end_to_end(response.headers_mut(), &up_parts.headers);

        Ok(response)
    }
}
