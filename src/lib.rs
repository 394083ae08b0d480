//! Transparent streaming HTTP API proxy.
//!
//! Requests are matched against a dynamic set of prefix→target mappings
//! and forwarded to the selected upstream with bodies streaming through
//! untouched (RFC 7230 transparency: hop-by-hop headers filtered, nothing
//! else rewritten, buffered, or re-encoded). The mapping set lives in a
//! Redis hash and stays coherent across a fleet through a pub/sub
//! invalidation channel backed by a periodic version poll.
//!
//! # Subsystems
//!
//! - [`kv`]: capability trait over the KV store, with Redis and
//!   in-memory backends
//! - [`registry`]: the authoritative in-memory mapping cache and its
//!   coherence workers
//! - [`routing`]: longest-prefix, segment-boundary path matching
//! - [`proxy`]: the per-request streaming forwarder and its shared
//!   connection pool
//! - [`stats`]: the observer hook and the statistics collector
//! - [`admin`]: mapping CRUD over HTTP with session-cookie auth
//! - [`http`]: axum router assembly and the dispatch handler
//! - [`config`], [`lifecycle`], [`error`]: settings, shutdown, errors

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod kv;
pub mod lifecycle;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod stats;
