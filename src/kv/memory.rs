//! In-process [`KvStore`] used by tests.
//!
//! Semantics mirror the Redis backend closely enough for the registry's
//! protocol: hashes, integer keys, and broadcast-based pub/sub. A failure
//! switch lets tests simulate a KV outage without tearing the store down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{KvStore, MessageStream};
use crate::error::KvError;

const CHANNEL_CAPACITY: usize = 64;

/// Shared in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    integers: Mutex<HashMap<String, i64>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail, simulating an unreachable
    /// store. Existing subscriptions keep their stream but receive nothing.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), KvError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(KvError::Command("simulated outage".into()))
        } else {
            Ok(())
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("channel map poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        self.check()?;
        let hashes = self.hashes.lock().expect("hash map poisoned");
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.check()?;
        let mut hashes = self.hashes.lock().expect("hash map poisoned");
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, KvError> {
        self.check()?;
        let mut hashes = self.hashes.lock().expect("hash map poisoned");
        let hash = hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            Ok(false)
        } else {
            hash.insert(field.to_string(), value.to_string());
            Ok(true)
        }
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, KvError> {
        self.check()?;
        let mut hashes = self.hashes.lock().expect("hash map poisoned");
        Ok(hashes
            .get_mut(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, KvError> {
        self.check()?;
        let hashes = self.hashes.lock().expect("hash map poisoned");
        Ok(hashes
            .get(key)
            .map(|hash| hash.contains_key(field))
            .unwrap_or(false))
    }

    async fn counter_incr(&self, key: &str) -> Result<i64, KvError> {
        self.check()?;
        let mut integers = self.integers.lock().expect("integer map poisoned");
        let value = integers.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>, KvError> {
        self.check()?;
        let integers = self.integers.lock().expect("integer map poisoned");
        Ok(integers.get(key).copied())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        self.check()?;
        let matches = |key: &str| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        };
        let hashes = self.hashes.lock().expect("hash map poisoned");
        let integers = self.integers.lock().expect("integer map poisoned");
        let mut keys: Vec<String> = hashes
            .keys()
            .chain(integers.keys())
            .filter(|key| matches(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<(), KvError> {
        self.check()?;
        let mut integers = self.integers.lock().expect("integer map poisoned");
        integers.insert(key.to_string(), value);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError> {
        self.check()?;
        // Send errors only mean nobody is subscribed.
        let _ = self.sender(channel).send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, KvError> {
        self.check()?;
        let rx = self.sender(channel).subscribe();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
