//! KV-store capabilities backing the mapping registry.
//!
//! The registry only ever talks to the [`KvStore`] trait, so it can run
//! against Redis in production and against [`MemoryStore`] in tests. The
//! trait surface is deliberately narrow: hash operations for the mapping
//! set, a counter for the version, and pub/sub for invalidations.

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::KvError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Stream of pub/sub payloads. Content is opaque to consumers; any message
/// on the invalidation channel means "reload".
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Operations the registry requires from the KV store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read an entire hash.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

    /// Set a hash field unconditionally.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    /// Set a hash field only if it does not exist. Returns `true` when the
    /// field was created by this call.
    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool, KvError>;

    /// Delete a hash field. Returns `true` when the field existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, KvError>;

    /// Check whether a hash field exists.
    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, KvError>;

    /// Atomically increment an integer key, returning the new value.
    async fn counter_incr(&self, key: &str) -> Result<i64, KvError>;

    /// Read an integer key. `None` means the key is absent, which callers
    /// must treat differently from zero.
    async fn get_i64(&self, key: &str) -> Result<Option<i64>, KvError>;

    /// Keys matching a glob pattern (only a trailing `*` is relied upon).
    /// The statistics restore uses this to enumerate per-endpoint keys.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;

    /// Write an integer key.
    async fn set_i64(&self, key: &str, value: i64) -> Result<(), KvError>;

    /// Publish a payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvError>;

    /// Subscribe to a channel. The stream ends when the connection closes.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, KvError>;
}
