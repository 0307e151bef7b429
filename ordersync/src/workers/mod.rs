//! Long-lived workers driving region synchronization.

pub mod pool;
pub mod region_sync;
