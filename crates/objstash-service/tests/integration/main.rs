// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod concurrency;
pub mod expiration;
pub mod snapshot;
pub mod store;
pub mod utils;

pub use utils::*;
