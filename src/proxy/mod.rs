//! Per-request streaming proxy engine.

pub mod client;
pub mod forwarder;
pub mod headers;
pub mod relay;

pub use client::{build_client, UpstreamClient};
pub use forwarder::Forwarder;
