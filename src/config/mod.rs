//! Environment-driven configuration.

pub mod schema;

pub use schema::Settings;
