//! Server binary: read settings, wire the subsystems, serve, drain.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_proxy::config::Settings;
use api_proxy::http::ratelimit::RateLimiter;
use api_proxy::http::{AppState, HttpServer};
use api_proxy::kv::{KvStore, RedisStore};
use api_proxy::lifecycle::{shutdown_signal, Shutdown};
use api_proxy::proxy::Forwarder;
use api_proxy::registry::{MappingRegistry, Registry};
use api_proxy::stats::{Collector, NoopObserver, Observer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_proxy=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        port = settings.port,
        stats = settings.enable_stats,
        rate_limit_rps = settings.rate_limit_rps,
        "api-proxy starting"
    );

    // KV first: an unreachable store is fatal, an empty one is not.
    let kv: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&settings.redis_url).await?);
    let registry = Registry::new(Arc::clone(&kv)).await?;

    let (collector, observer): (Option<Arc<Collector>>, Arc<dyn Observer>) =
        if settings.enable_stats {
            let collector = Arc::new(Collector::with_persistence(Arc::clone(&kv)));
            collector.restore().await;
            (Some(Arc::clone(&collector)), collector)
        } else {
            (None, Arc::new(NoopObserver))
        };

    let shutdown = Shutdown::new();
    let stats_workers = collector
        .as_ref()
        .map(|c| Arc::clone(c).spawn_workers(shutdown.subscribe()))
        .unwrap_or_default();

    let registry_dyn: Arc<dyn MappingRegistry> = registry.clone();
    let forwarder = Arc::new(Forwarder::new(Arc::clone(&registry_dyn), observer));

    if settings.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; admin endpoints will answer 503");
    }

    let state = AppState {
        registry: registry_dyn,
        forwarder,
        collector,
        admin_token: settings.admin_token.clone().map(Arc::from),
        rate_limiter: (settings.rate_limit_rps > 0)
            .then(|| Arc::new(RateLimiter::new(settings.rate_limit_rps))),
    };

    let listener = TcpListener::bind(settings.bind_address()).await?;
    let server = HttpServer::new(state);
    server.run(listener, shutdown_signal()).await?;

    // In-flight requests were drained by the server; stop background work.
    shutdown.trigger();
    for handle in stats_workers {
        let _ = handle.await;
    }
    registry.close().await;

    tracing::info!("shutdown complete");
    Ok(())
}
