//! Crate-wide error taxonomy.
//!
//! Errors stay typed until they hit the HTTP boundary; only the axum
//! handlers in [`crate::http`] and [`crate::admin`] turn them into status
//! codes and JSON bodies.

use thiserror::Error;

/// Errors from the KV store backing the mapping registry.
#[derive(Debug, Error)]
pub enum KvError {
    /// The connection URL could not be parsed or uses an unknown scheme.
    #[error("invalid KV connection URL: {0}")]
    InvalidUrl(String),

    /// Establishing the initial connection failed.
    #[error("KV connection failed: {0}")]
    Connect(String),

    /// A command failed after the connection was established.
    #[error("KV command failed: {0}")]
    Command(String),

    /// The pub/sub subscription could not be established.
    #[error("KV subscribe failed: {0}")]
    Subscribe(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        KvError::Command(err.to_string())
    }
}

/// Errors from the mapping registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No mapping is configured for the prefix.
    #[error("mapping not found for prefix: {0}")]
    NotFound(String),

    /// An `add` hit a prefix that is already mapped.
    #[error("mapping already exists for prefix: {0}")]
    AlreadyExists(String),

    /// The prefix or target failed validation.
    #[error("{0}")]
    Validation(String),

    /// A reload exceeded its deadline; registry state was left intact.
    #[error("reload timed out after {0:?}")]
    ReloadTimeout(std::time::Duration),

    /// The underlying KV store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Errors from the streaming forwarder.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The registry holds no target for the matched prefix. No upstream
    /// request was dispatched and the observer was not notified.
    #[error("no mapping for prefix: {0}")]
    MappingAbsent(String),

    /// The assembled upstream URL is not a valid URI.
    #[error("invalid upstream URL {url}: {source}")]
    InvalidTarget {
        url: String,
        source: http::uri::InvalidUri,
    },

    /// The upstream request could not be constructed.
    #[error("failed to build upstream request: {0}")]
    Request(#[from] http::Error),

    /// Dial, TLS, or header-read failure on the upstream leg.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    /// The guard deadline expired before the upstream produced a response
    /// head.
    #[error("upstream deadline exceeded")]
    DeadlineExceeded,

    /// A registry lookup failed for a reason other than a plain miss.
    #[error(transparent)]
    Registry(RegistryError),
}

/// Errors reading settings from the environment.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
