//! Shared utilities for integration tests: a fully wired proxy over the
//! in-memory KV store, and programmable mock upstreams.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_proxy::http::{AppState, HttpServer};
use api_proxy::kv::{KvStore, MemoryStore};
use api_proxy::proxy::Forwarder;
use api_proxy::registry::{MappingRegistry, Registry};
use api_proxy::stats::{Collector, Observer};

/// A proxy instance listening on an ephemeral port, plus handles to its
/// innards for assertions.
#[allow(dead_code)]
pub struct TestProxy {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub store: Arc<MemoryStore>,
    pub collector: Arc<Collector>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Knobs for [`spawn_proxy_with_options`].
pub struct ProxyOptions {
    pub admin_token: Option<&'static str>,
    pub rate_limit_rps: u32,
    pub enable_stats: bool,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            admin_token: None,
            rate_limit_rps: 0,
            enable_stats: true,
        }
    }
}

/// Start a proxy over a fresh in-memory store.
pub async fn spawn_proxy(admin_token: Option<&'static str>) -> TestProxy {
    spawn_proxy_with_store(Arc::new(MemoryStore::new()), admin_token).await
}

/// Start a proxy over the given store (lets tests share a store between
/// peers or pre-seed it).
pub async fn spawn_proxy_with_store(
    store: Arc<MemoryStore>,
    admin_token: Option<&'static str>,
) -> TestProxy {
    spawn_proxy_with_options(
        store,
        ProxyOptions {
            admin_token,
            ..ProxyOptions::default()
        },
    )
    .await
}

/// Start a proxy with full control over the optional subsystems.
#[allow(dead_code)]
pub async fn spawn_proxy_with_options(store: Arc<MemoryStore>, opts: ProxyOptions) -> TestProxy {
    let kv: Arc<dyn KvStore> = store.clone();
    let registry = Registry::new(kv).await.expect("registry init");
    let collector = Arc::new(Collector::new());

    let registry_dyn: Arc<dyn MappingRegistry> = registry.clone();
    let observer: Arc<dyn Observer> = if opts.enable_stats {
        collector.clone()
    } else {
        Arc::new(api_proxy::stats::NoopObserver)
    };
    let forwarder = Arc::new(Forwarder::new(Arc::clone(&registry_dyn), observer));

    let state = AppState {
        registry: registry_dyn,
        forwarder,
        collector: opts.enable_stats.then(|| collector.clone()),
        admin_token: opts.admin_token.map(Arc::from),
        rate_limiter: (opts.rate_limit_rps > 0).then(|| {
            Arc::new(api_proxy::http::ratelimit::RateLimiter::new(
                opts.rate_limit_rps,
            ))
        }),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(state);
    tokio::spawn(async move {
        let _ = server.run(listener, std::future::pending()).await;
    });

    TestProxy {
        addr,
        registry,
        store,
        collector,
    }
}

/// Serve an axum router on an ephemeral port.
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// One request as the upstream saw it.
pub struct CapturedRequest {
    pub method: String,
    pub uri: String,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct Captured {
    inner: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl Captured {
    pub fn take(&self) -> Vec<CapturedRequest> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Upstream that records every request and answers with a fixed response.
/// `response_headers` may repeat names to produce multi-value headers.
pub async fn spawn_capture_upstream(
    status: u16,
    body: &'static str,
    response_headers: Vec<(&'static str, &'static str)>,
) -> (SocketAddr, Captured) {
    let captured = Captured::default();
    let cap = captured.clone();

    let app = Router::new().fallback(move |req: Request| {
        let cap = cap.clone();
        let response_headers = response_headers.clone();
        async move {
            let (parts, req_body) = req.into_parts();
            let bytes = axum::body::to_bytes(req_body, usize::MAX).await.unwrap();
            cap.inner.lock().unwrap().push(CapturedRequest {
                method: parts.method.to_string(),
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body: bytes.to_vec(),
            });

            let mut builder = Response::builder().status(status);
            for (name, value) in response_headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(body)).unwrap()
        }
    });

    (spawn_upstream(app).await, captured)
}

/// Upstream that streams whatever the test feeds through the returned
/// sender, as a `text/event-stream` response. Dropping the sender ends the
/// stream.
#[allow(dead_code)]
pub async fn spawn_streaming_upstream() -> (SocketAddr, mpsc::Sender<String>) {
    let (tx, rx) = mpsc::channel::<String>(16);
    let rx = Arc::new(tokio::sync::Mutex::new(Some(rx)));

    let app = Router::new().fallback(move || {
        let rx = rx.clone();
        async move {
            let rx = rx.lock().await.take().expect("streaming upstream reused");
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|chunk| (Ok::<Bytes, std::convert::Infallible>(Bytes::from(chunk)), rx))
            });
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(stream))
                .unwrap()
        }
    });

    (spawn_upstream(app).await, tx)
}

/// A `reqwest` client that talks straight to localhost.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client")
}

/// A client with a cookie store, for admin session flows.
#[allow(dead_code)]
pub fn cookie_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .cookie_store(true)
        .build()
        .expect("client")
}
