//! A process-wide shared object cache.
//!
//! Values are encoded into a deterministic, self-describing byte format when they are stored,
//! and lazily reconstructed (at most once per stored generation) when they are fetched. See the
//! [`caching`] module for an overview of how the pieces fit together.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod codec;
pub mod config;
pub mod logging;
pub mod types;
