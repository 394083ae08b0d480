//! Path-to-mapping routing.

pub mod matcher;

pub use matcher::{matches, split_path};
