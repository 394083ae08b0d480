//! Dynamic prefix→target mapping registry.
//!
//! The registry owns the authoritative in-memory mapping set, backed by a
//! KV hash and kept coherent across a fleet by two mechanisms: a pub/sub
//! invalidation channel (fast path) and a periodic version poll (fallback).
//! Readers only ever see a whole map: reloads build the replacement off to
//! the side and swap it in under the write lock.

pub mod validate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::kv::{KvStore, MessageStream};

pub use validate::validate_mapping;

/// KV hash holding `prefix → target`.
pub const KEY_MAPPINGS: &str = "apiproxy:mappings";
/// KV integer key holding the mapping-set version.
pub const KEY_VERSION: &str = "apiproxy:mappings:version";
/// Pub/sub channel carrying invalidation messages.
pub const CHANNEL_UPDATES: &str = "apiproxy:mappings:updates";

/// Cadence of the fallback version poll.
pub const POLL_PERIOD: Duration = Duration::from_secs(10);
/// Deadline for any single reload; an expired reload leaves state intact.
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Read/lookup/mutation surface of the registry, as a seam for tests and
/// for the forwarder.
#[async_trait]
pub trait MappingRegistry: Send + Sync {
    /// Resolve a prefix to its target. Serves from the cache; a miss falls
    /// back to one full KV read to paper over pre-warm races.
    async fn get(&self, prefix: &str) -> Result<String, RegistryError>;

    /// Independent copy of the current mapping set.
    fn snapshot(&self) -> HashMap<String, String>;

    /// All prefixes, longest first (ties broken lexicographically) so the
    /// matcher's first hit is the longest match.
    fn prefixes(&self) -> Vec<String>;

    async fn add(&self, prefix: &str, target: &str) -> Result<(), RegistryError>;
    async fn update(&self, prefix: &str, target: &str) -> Result<(), RegistryError>;
    async fn delete(&self, prefix: &str) -> Result<(), RegistryError>;

    /// Unconditional reload, bypassing the version short-circuit.
    async fn force_reload(&self) -> Result<(), RegistryError>;

    fn version(&self) -> i64;
    fn count(&self) -> usize;
    fn is_initialized(&self) -> bool;
}

/// KV-backed registry with background coherence workers.
pub struct Registry {
    kv: Arc<dyn KvStore>,
    cache: RwLock<HashMap<String, String>>,
    version: AtomicI64,
    last_reload: AtomicI64,
    initialized: AtomicBool,
    // Serializes reloads from the poller, the listener, and force_reload.
    reload_serial: Mutex<()>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    /// Load the initial mapping set, subscribe to invalidations, and spawn
    /// the poller and listener workers.
    ///
    /// An unreachable KV store is fatal; an empty mapping hash is not (the
    /// registry starts empty and the admin API populates it).
    pub async fn new(kv: Arc<dyn KvStore>) -> Result<Arc<Self>, RegistryError> {
        let (shutdown, _) = watch::channel(false);
        let registry = Arc::new(Self {
            kv,
            cache: RwLock::new(HashMap::new()),
            version: AtomicI64::new(0),
            last_reload: AtomicI64::new(unix_now()),
            initialized: AtomicBool::new(false),
            reload_serial: Mutex::new(()),
            shutdown,
            workers: Mutex::new(Vec::new()),
        });

        registry.reload_with_deadline().await?;
        registry.initialized.store(true, Ordering::SeqCst);

        let stream = registry.kv.subscribe(CHANNEL_UPDATES).await?;
        let poller = tokio::spawn(Arc::clone(&registry).poll_loop(registry.shutdown.subscribe()));
        let listener =
            tokio::spawn(Arc::clone(&registry).listen_loop(stream, registry.shutdown.subscribe()));
        registry.workers.lock().await.extend([poller, listener]);

        info!(
            count = registry.count(),
            version = registry.version(),
            "mapping registry initialized"
        );
        Ok(registry)
    }

    /// Stop both workers, wait for them, and release the KV handle.
    /// Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }

    async fn reload_with_deadline(&self) -> Result<(), RegistryError> {
        tokio::time::timeout(RELOAD_TIMEOUT, self.reload())
            .await
            .map_err(|_| RegistryError::ReloadTimeout(RELOAD_TIMEOUT))?
    }

    /// Reload from the KV store unless the remote version matches ours.
    async fn reload(&self) -> Result<(), RegistryError> {
        let _serial = self.reload_serial.lock().await;

        let remote = self.kv.get_i64(KEY_VERSION).await?;
        if let Some(remote) = remote {
            if remote > 0 && remote == self.version.load(Ordering::SeqCst) {
                self.touch_reload();
                return Ok(());
            }
        }

        let mappings = self.kv.hash_get_all(KEY_MAPPINGS).await?;
        if mappings.is_empty() {
            warn!("no mappings in KV store; use the admin API to add some");
            self.touch_reload();
            return Ok(());
        }

        let count = mappings.len();
        self.swap_cache(mappings);
        self.sync_version(remote).await;
        self.touch_reload();

        info!(count, version = self.version(), "reloaded mappings");
        Ok(())
    }

    fn swap_cache(&self, fresh: HashMap<String, String>) {
        let mut cache = self.cache.write().expect("mapping cache poisoned");
        *cache = fresh;
    }

    /// Adopt the remote version, or mint the next local one and write it
    /// back when the remote counter is absent.
    async fn sync_version(&self, remote: Option<i64>) {
        match remote {
            Some(v) if v > 0 => self.version.store(v, Ordering::SeqCst),
            _ => {
                let next = self.version.fetch_add(1, Ordering::SeqCst) + 1;
                if let Err(err) = self.kv.set_i64(KEY_VERSION, next).await {
                    warn!(error = %err, "failed to write version back to KV");
                }
            }
        }
    }

    /// Bump the remote version after a mutation and mirror it locally.
    async fn bump_version(&self) {
        match self.kv.counter_incr(KEY_VERSION).await {
            Ok(v) => self.version.store(v, Ordering::SeqCst),
            Err(err) => {
                warn!(error = %err, "failed to increment remote version");
                self.version.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Publish an invalidation. Failure is logged, not returned: peers
    /// converge through the poller anyway.
    async fn publish_invalidation(&self, event: &str) {
        if let Err(err) = self.kv.publish(CHANNEL_UPDATES, event).await {
            warn!(error = %err, event, "failed to publish invalidation");
        }
    }

    fn touch_reload(&self) {
        self.last_reload.store(unix_now(), Ordering::SeqCst);
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; the initial load already happened.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("registry poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.reload_with_deadline().await {
                        warn!(error = %err, "periodic reload failed");
                    }
                }
            }
        }
    }

    async fn listen_loop(
        self: Arc<Self>,
        mut stream: MessageStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("invalidation listener stopped");
                    return;
                }
                message = stream.next() => match message {
                    Some(payload) => {
                        debug!(payload = %payload, "invalidation received");
                        if let Err(err) = self.reload_with_deadline().await {
                            warn!(error = %err, "reload after invalidation failed");
                        }
                    }
                    None => {
                        // The poller remains as the fallback path.
                        warn!("invalidation channel closed");
                        return;
                    }
                },
            }
        }
    }
}

#[async_trait]
impl MappingRegistry for Registry {
    async fn get(&self, prefix: &str) -> Result<String, RegistryError> {
        {
            let cache = self.cache.read().expect("mapping cache poisoned");
            if let Some(target) = cache.get(prefix) {
                return Ok(target.clone());
            }
        }

        // Pre-warm race fallback: one full read, then cache the hit.
        let all = self.kv.hash_get_all(KEY_MAPPINGS).await?;
        match all.get(prefix) {
            Some(target) => {
                let mut cache = self.cache.write().expect("mapping cache poisoned");
                cache.insert(prefix.to_string(), target.clone());
                Ok(target.clone())
            }
            None => Err(RegistryError::NotFound(prefix.to_string())),
        }
    }

    fn snapshot(&self) -> HashMap<String, String> {
        self.cache.read().expect("mapping cache poisoned").clone()
    }

    fn prefixes(&self) -> Vec<String> {
        let cache = self.cache.read().expect("mapping cache poisoned");
        let mut prefixes: Vec<String> = cache.keys().cloned().collect();
        prefixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        prefixes
    }

    async fn add(&self, prefix: &str, target: &str) -> Result<(), RegistryError> {
        validate_mapping(prefix, target)?;

        let created = self.kv.hash_set_nx(KEY_MAPPINGS, prefix, target).await?;
        if !created {
            return Err(RegistryError::AlreadyExists(prefix.to_string()));
        }

        self.bump_version().await;
        {
            let mut cache = self.cache.write().expect("mapping cache poisoned");
            cache.insert(prefix.to_string(), target.to_string());
        }
        self.publish_invalidation("mapping_added").await;

        info!(prefix, target, version = self.version(), "added mapping");
        Ok(())
    }

    async fn update(&self, prefix: &str, target: &str) -> Result<(), RegistryError> {
        validate_mapping(prefix, target)?;

        if !self.kv.hash_exists(KEY_MAPPINGS, prefix).await? {
            return Err(RegistryError::NotFound(prefix.to_string()));
        }
        self.kv.hash_set(KEY_MAPPINGS, prefix, target).await?;

        self.bump_version().await;
        {
            let mut cache = self.cache.write().expect("mapping cache poisoned");
            cache.insert(prefix.to_string(), target.to_string());
        }
        self.publish_invalidation("mapping_updated").await;

        info!(prefix, target, version = self.version(), "updated mapping");
        Ok(())
    }

    async fn delete(&self, prefix: &str) -> Result<(), RegistryError> {
        let removed = self.kv.hash_delete(KEY_MAPPINGS, prefix).await?;
        if !removed {
            return Err(RegistryError::NotFound(prefix.to_string()));
        }

        self.bump_version().await;
        {
            let mut cache = self.cache.write().expect("mapping cache poisoned");
            cache.remove(prefix);
        }
        self.publish_invalidation("mapping_deleted").await;

        info!(prefix, version = self.version(), "deleted mapping");
        Ok(())
    }

    async fn force_reload(&self) -> Result<(), RegistryError> {
        let _serial = self.reload_serial.lock().await;

        let mappings = self.kv.hash_get_all(KEY_MAPPINGS).await?;
        let count = mappings.len();
        self.swap_cache(mappings);

        let remote = self.kv.get_i64(KEY_VERSION).await.unwrap_or_else(|err| {
            warn!(error = %err, "failed to read remote version");
            None
        });
        self.sync_version(remote).await;
        self.touch_reload();

        info!(count, version = self.version(), "force reloaded mappings");
        Ok(())
    }

    fn version(&self) -> i64 {
        self.version.load(Ordering::SeqCst)
    }

    fn count(&self) -> usize {
        self.cache.read().expect("mapping cache poisoned").len()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
