//! Shared helpers for unit and integration tests.

pub mod feed;
pub mod tracing;
