//! Shared key-value cache used for region cooldowns.
//!
//! The cooldown between two cycles of the same region is expressed as the TTL of
//! the region's cache entry: while the entry lives, the region is cooling down.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SyncResult;
use crate::types::RegionId;

/// Cache key under which a region's cooldown entry is stored.
pub fn region_cooldown_key(region_id: RegionId) -> String {
    format!("ordersync:cooldown:{region_id}")
}

/// Expiring-key cache; the remaining TTL of a key is the only readable state.
pub trait CooldownCache {
    /// Marks `key` as live for the next `ttl`.
    fn set_with_ttl(&self, key: String, ttl: Duration)
    -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the remaining TTL of `key`, or `None` when the entry is absent or
    /// already expired.
    fn remaining_ttl(&self, key: &str) -> impl Future<Output = SyncResult<Option<Duration>>> + Send;
}

/// In-memory implementation of [`CooldownCache`].
///
/// Expired entries are dropped lazily on read; with one entry per region the map
/// never grows beyond the region count.
#[derive(Debug, Clone, Default)]
pub struct MemoryCooldownCache {
    deadlines: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryCooldownCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CooldownCache for MemoryCooldownCache {
    async fn set_with_ttl(&self, key: String, ttl: Duration) -> SyncResult<()> {
        let mut deadlines = self.deadlines.lock().expect("cooldown cache lock poisoned");
        deadlines.insert(key, Instant::now() + ttl);

        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> SyncResult<Option<Duration>> {
        let mut deadlines = self.deadlines.lock().expect("cooldown cache lock poisoned");

        let Some(deadline) = deadlines.get(key) else {
            return Ok(None);
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            deadlines.remove(key);
            return Ok(None);
        }

        Ok(Some(remaining))
    }
}
