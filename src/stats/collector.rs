//! Statistics collection and the `/stats` snapshot.
//!
//! Counters are plain atomics updated from the observer hooks. Two
//! background ticks run alongside the server: a fast one refreshing the
//! derived rate/latency figures, and a slow one persisting counters to the
//! KV store so restarts do not zero the dashboard. Persistence is best
//! effort; failures are logged and retried on the next tick.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::kv::KvStore;
use crate::stats::Observer;

/// KV hash holding the global counters.
pub const KEY_STATS_COUNTERS: &str = "apiproxy:stats:counters";
/// Key prefix of the per-endpoint KV hashes: each endpoint persists to
/// `apiproxy:stats:endpoints:<prefix>` with `total` and `errors` fields.
pub const KEY_STATS_ENDPOINT_PREFIX: &str = "apiproxy:stats:endpoints:";

/// Cadence of the derived-metrics refresh.
const AGGREGATE_PERIOD: Duration = Duration::from_secs(5);
/// Cadence of counter persistence.
const PERSIST_PERIOD: Duration = Duration::from_secs(60);
/// Latency accumulators reset after this many samples so the average
/// tracks recent traffic.
const LATENCY_WINDOW: i64 = 1000;

#[derive(Default)]
struct EndpointCounters {
    total: AtomicI64,
    errors: AtomicI64,
}

struct PerfWindow {
    last_tick: Instant,
    last_count: i64,
    requests_per_sec: f64,
    avg_response_time_ms: i64,
}

/// Statistics collector. Shared via `Arc`; all updates are lock-free.
pub struct Collector {
    kv: Option<Arc<dyn KvStore>>,
    endpoints: DashMap<String, EndpointCounters>,
    request_count: AtomicI64,
    error_count: AtomicI64,
    latency_sum_ms: AtomicI64,
    latency_count: AtomicI64,
    perf: Mutex<PerfWindow>,
    started_at: Instant,
}

/// Serialized form of [`Collector::snapshot`].
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total: i64,
    pub errors: i64,
    pub uptime_secs: u64,
    pub endpoints: BTreeMap<String, EndpointSnapshot>,
    pub performance: PerformanceSnapshot,
}

#[derive(Debug, Serialize)]
pub struct EndpointSnapshot {
    pub total: i64,
    pub errors: i64,
}

#[derive(Debug, Serialize)]
pub struct PerformanceSnapshot {
    pub requests_per_sec: f64,
    pub avg_response_time_ms: i64,
    pub error_rate: f64,
}

impl Collector {
    /// Collector without persistence (tests, or KV-less operation).
    pub fn new() -> Self {
        Self::with_kv(None)
    }

    /// Collector persisting to (and restoring from) the given store.
    pub fn with_persistence(kv: Arc<dyn KvStore>) -> Self {
        Self::with_kv(Some(kv))
    }

    fn with_kv(kv: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            kv,
            endpoints: DashMap::new(),
            request_count: AtomicI64::new(0),
            error_count: AtomicI64::new(0),
            latency_sum_ms: AtomicI64::new(0),
            latency_count: AtomicI64::new(0),
            perf: Mutex::new(PerfWindow {
                last_tick: Instant::now(),
                last_count: 0,
                requests_per_sec: 0.0,
                avg_response_time_ms: 0,
            }),
            started_at: Instant::now(),
        }
    }

    /// Restore counters saved by a previous run. Best effort: failures are
    /// logged and the collector starts fresh.
    pub async fn restore(&self) {
        let Some(kv) = &self.kv else { return };

        match kv.hash_get_all(KEY_STATS_COUNTERS).await {
            Ok(counters) => {
                restore_atomic(&counters, "request_count", &self.request_count);
                restore_atomic(&counters, "error_count", &self.error_count);
                restore_atomic(&counters, "latency_sum_ms", &self.latency_sum_ms);
                restore_atomic(&counters, "latency_count", &self.latency_count);
            }
            Err(err) => {
                warn!(error = %err, "failed to restore stats counters; starting fresh");
                return;
            }
        }

        let keys = match kv.keys(&format!("{KEY_STATS_ENDPOINT_PREFIX}*")).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "failed to list endpoint stats keys");
                return;
            }
        };
        for key in keys {
            let prefix = key[KEY_STATS_ENDPOINT_PREFIX.len()..].to_string();
            let fields = match kv.hash_get_all(&key).await {
                Ok(fields) => fields,
                Err(err) => {
                    warn!(error = %err, prefix = %prefix, "failed to restore endpoint stats");
                    continue;
                }
            };
            let entry = self.endpoints.entry(prefix).or_default();
            if let Some(total) = fields.get("total").and_then(|v| v.parse::<i64>().ok()) {
                entry.total.store(total, Ordering::SeqCst);
            }
            if let Some(errors) = fields.get("errors").and_then(|v| v.parse::<i64>().ok()) {
                entry.errors.store(errors, Ordering::SeqCst);
            }
        }

        debug!(
            endpoints = self.endpoints.len(),
            total = self.request_count.load(Ordering::SeqCst),
            "restored stats from KV"
        );
    }

    /// Persist current counters. Called from the slow tick.
    pub async fn persist(&self) -> Result<(), crate::error::KvError> {
        let Some(kv) = &self.kv else { return Ok(()) };

        for (field, value) in [
            ("request_count", self.request_count.load(Ordering::SeqCst)),
            ("error_count", self.error_count.load(Ordering::SeqCst)),
            ("latency_sum_ms", self.latency_sum_ms.load(Ordering::SeqCst)),
            ("latency_count", self.latency_count.load(Ordering::SeqCst)),
        ] {
            kv.hash_set(KEY_STATS_COUNTERS, field, &value.to_string())
                .await?;
        }

        for entry in self.endpoints.iter() {
            let key = format!("{KEY_STATS_ENDPOINT_PREFIX}{}", entry.key());
            kv.hash_set(&key, "total", &entry.total.load(Ordering::SeqCst).to_string())
                .await?;
            kv.hash_set(
                &key,
                "errors",
                &entry.errors.load(Ordering::SeqCst).to_string(),
            )
            .await?;
        }

        Ok(())
    }

    /// Refresh the derived rate and latency figures.
    pub fn aggregate(&self) {
        let mut perf = self.perf.lock().expect("perf window poisoned");

        let now = Instant::now();
        let elapsed = now.duration_since(perf.last_tick).as_secs_f64();
        let count = self.request_count.load(Ordering::SeqCst);
        if elapsed > 0.0 {
            let instant_rate = (count - perf.last_count) as f64 / elapsed;
            perf.requests_per_sec = if perf.requests_per_sec == 0.0 {
                instant_rate
            } else {
                0.3 * instant_rate + 0.7 * perf.requests_per_sec
            };
            perf.requests_per_sec = (perf.requests_per_sec * 100.0).round() / 100.0;
            perf.last_tick = now;
            perf.last_count = count;
        }

        let samples = self.latency_count.load(Ordering::SeqCst);
        if samples > 0 {
            perf.avg_response_time_ms = self.latency_sum_ms.load(Ordering::SeqCst) / samples;
            if samples > LATENCY_WINDOW {
                self.latency_sum_ms.store(0, Ordering::SeqCst);
                self.latency_count.store(0, Ordering::SeqCst);
            }
        }
    }

    /// Point-in-time snapshot for `GET /stats`.
    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.request_count.load(Ordering::SeqCst);
        let errors = self.error_count.load(Ordering::SeqCst);

        let endpoints = self
            .endpoints
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    EndpointSnapshot {
                        total: entry.total.load(Ordering::SeqCst),
                        errors: entry.errors.load(Ordering::SeqCst),
                    },
                )
            })
            .collect();

        let perf = self.perf.lock().expect("perf window poisoned");
        let error_rate = if total > 0 {
            ((errors as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        StatsSnapshot {
            total,
            errors,
            uptime_secs: self.started_at.elapsed().as_secs(),
            endpoints,
            performance: PerformanceSnapshot {
                requests_per_sec: perf.requests_per_sec,
                avg_response_time_ms: perf.avg_response_time_ms,
                error_rate,
            },
        }
    }

    /// Spawn the aggregation and persistence ticks. Both stop when the
    /// shutdown watch fires.
    pub fn spawn_workers(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let collector = Arc::clone(&self);
        let mut agg_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AGGREGATE_PERIOD);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = agg_shutdown.changed() => return,
                    _ = ticker.tick() => collector.aggregate(),
                }
            }
        }));

        if self.kv.is_some() {
            let collector = Arc::clone(&self);
            let mut persist_shutdown = shutdown;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PERSIST_PERIOD);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = persist_shutdown.changed() => {
                            // Final flush so a clean shutdown loses nothing.
                            if let Err(err) = collector.persist().await {
                                warn!(error = %err, "final stats persist failed");
                            }
                            return;
                        }
                        _ = ticker.tick() => {
                            if let Err(err) = collector.persist().await {
                                warn!(error = %err, "stats persist failed");
                            }
                        }
                    }
                }
            }));
        }

        handles
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for Collector {
    fn request_started(&self, prefix: &str) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .entry(prefix.to_string())
            .or_default()
            .total
            .fetch_add(1, Ordering::SeqCst);
    }

    fn request_failed(&self, prefix: &str) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .entry(prefix.to_string())
            .or_default()
            .errors
            .fetch_add(1, Ordering::SeqCst);
    }

    fn latency_sample(&self, elapsed: Duration) {
        self.latency_sum_ms
            .fetch_add(elapsed.as_millis() as i64, Ordering::SeqCst);
        self.latency_count.fetch_add(1, Ordering::SeqCst);
    }
}

fn restore_atomic(
    fields: &std::collections::HashMap<String, String>,
    name: &str,
    into: &AtomicI64,
) {
    if let Some(value) = fields.get(name).and_then(|v| v.parse::<i64>().ok()) {
        into.store(value, Ordering::SeqCst);
    }
}
