//! Test utilities and helpers
//!
//! Fixtures for stores and services, and async helpers for waiting on
//! connection queues and background tasks. Used by unit tests, the
//! integration tests under `tests/` and the benches.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
