//! Lazy resolution of location display names.
//!
//! Orders arrive carrying only numeric location ids. When the reconciler inserts
//! an order at a location it has not seen before, the resolver looks the name up
//! out of band and back-fills it, so the sync cycle never waits on reference
//! lookups.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::feed::client::MarketFeed;
use crate::feed::rate_gate::RateGate;
use crate::store::orders::{LocationRecord, OrderStore};
use crate::types::{LocationId, SystemId};

#[derive(Debug)]
struct ResolverInner<F, S> {
    feed: F,
    store: S,
    gate: Arc<RateGate>,
    /// Locations already resolved (or in flight) this process lifetime.
    resolved: Mutex<HashSet<LocationId>>,
}

/// Resolves and back-fills location display names.
#[derive(Debug)]
pub struct LocationResolver<F, S> {
    inner: Arc<ResolverInner<F, S>>,
}

impl<F, S> Clone for LocationResolver<F, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F, S> LocationResolver<F, S>
where
    F: MarketFeed + Send + Sync + 'static,
    S: OrderStore + Send + Sync + 'static,
{
    pub fn new(feed: F, store: S, gate: Arc<RateGate>) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                feed,
                store,
                gate,
                resolved: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Resolves one location's name and back-fills it into the store.
    ///
    /// Each location is resolved at most once per process lifetime; repeat calls
    /// return immediately. When the location's own name is not accessible, a
    /// fallback name is synthesized from the owning solar system.
    pub async fn resolve(&self, location_id: LocationId, system_id: SystemId) -> SyncResult<()> {
        {
            let mut resolved = self.inner.resolved.lock().expect("resolver lock poisoned");
            if !resolved.insert(location_id) {
                return Ok(());
            }
        }

        let result = self.resolve_inner(location_id, system_id).await;
        if result.is_err() {
            // Give a later cycle the chance to retry.
            let mut resolved = self.inner.resolved.lock().expect("resolver lock poisoned");
            resolved.remove(&location_id);
        }

        result
    }

    async fn resolve_inner(&self, location_id: LocationId, system_id: SystemId) -> SyncResult<()> {
        self.inner.gate.acquire().await;
        let name = match self.inner.feed.fetch_location_name(location_id).await {
            Ok(Some(name)) => name,
            Ok(None) => self.structure_fallback_name(system_id).await,
            Err(err) => {
                warn!(location_id, "location name lookup failed: {err}");
                self.structure_fallback_name(system_id).await
            }
        };

        debug!(location_id, name, "resolved location");

        self.inner
            .store
            .upsert_location(LocationRecord {
                location_id,
                system_id,
                name: name.clone(),
            })
            .await?;
        self.inner
            .store
            .set_order_location_names(location_id, name)
            .await?;

        Ok(())
    }

    /// Synthesizes a display name for a location whose own name is inaccessible,
    /// from the name of its solar system.
    async fn structure_fallback_name(&self, system_id: SystemId) -> String {
        self.inner.gate.acquire().await;
        let system_name = match self.inner.feed.fetch_system_name(system_id).await {
            Ok(Some(name)) => name,
            Ok(None) => system_id.to_string(),
            Err(err) => {
                warn!(system_id, "system name lookup failed: {err}");
                system_id.to_string()
            }
        };

        format!("{system_name} Structure")
    }

    /// Resolves a location on a background task.
    pub fn spawn_resolve(&self, location_id: LocationId, system_id: SystemId) {
        let resolver = self.clone();
        tokio::spawn(async move {
            if let Err(err) = resolver.resolve(location_id, system_id).await {
                warn!(location_id, "failed to back-fill location name: {err}");
            }
        });
    }
}
