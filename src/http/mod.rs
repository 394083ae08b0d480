//! HTTP server glue.

pub mod ratelimit;
pub mod server;

pub use server::{AppState, HttpServer};
