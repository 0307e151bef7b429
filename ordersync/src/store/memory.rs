//! In-memory order store for testing and development.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::store::orders::{BatchStats, LocationRecord, OrderStore, OrderWriteBatch};
use crate::types::{LocationId, Order, OrderDigest, OrderId, RegionId, TypeId};

#[derive(Debug, Default)]
struct Inner {
    orders: HashMap<OrderId, Order>,
    watermarks: HashMap<TypeId, DateTime<Utc>>,
    locations: HashMap<LocationId, LocationRecord>,
    batches_applied: u64,
    removal_batches_applied: u64,
}

/// In-memory implementation of [`OrderStore`].
///
/// Holds everything in a single map guarded by one mutex, which trivially gives the
/// per-`order_id` uniqueness the engine relies on. The operation counters exist so
/// tests can assert that a code path produced no store traffic.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of one order, if present.
    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        let inner = self.inner.lock().await;
        inner.orders.get(&order_id).cloned()
    }

    /// Returns the total number of orders across all regions.
    pub async fn order_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.orders.len()
    }

    /// Returns copies of all orders in a region.
    pub async fn orders_in_region(&self, region_id: RegionId) -> Vec<Order> {
        let inner = self.inner.lock().await;
        inner
            .orders
            .values()
            .filter(|order| order.region_id == region_id)
            .cloned()
            .collect()
    }

    /// Returns a copy of one location record, if resolved.
    pub async fn location(&self, location_id: LocationId) -> Option<LocationRecord> {
        let inner = self.inner.lock().await;
        inner.locations.get(&location_id).cloned()
    }

    /// Number of write batches applied so far.
    pub async fn batches_applied(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.batches_applied
    }

    /// Number of removal batches applied so far.
    pub async fn removal_batches_applied(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.removal_batches_applied
    }

    /// Seeds the store with existing orders, bypassing batch accounting.
    pub async fn seed_orders(&self, orders: Vec<Order>) {
        let mut inner = self.inner.lock().await;
        for order in orders {
            inner.orders.insert(order.order_id, order);
        }
    }
}

impl OrderStore for MemoryOrderStore {
    async fn region_snapshot(
        &self,
        region_id: RegionId,
    ) -> SyncResult<HashMap<OrderId, OrderDigest>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .orders
            .values()
            .filter(|order| order.region_id == region_id)
            .map(|order| (order.order_id, OrderDigest::from(order)))
            .collect())
    }

    async fn apply_batch(&self, batch: OrderWriteBatch) -> SyncResult<BatchStats> {
        let mut inner = self.inner.lock().await;
        let mut stats = BatchStats::default();

        for order in batch.upserts {
            match inner.orders.entry(order.order_id) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(order);
                    stats.inserted += 1;
                }
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    // Set-on-insert semantics: a concurrently inserted record keeps
                    // everything except the always-set mutable fields.
                    let existing = entry.get_mut();
                    existing.price = order.price;
                    existing.volume_remain = order.volume_remain;
                    stats.updated += 1;
                }
            }
        }

        for update in batch.updates {
            if let Some(order) = inner.orders.get_mut(&update.order_id) {
                if let Some(price) = update.price {
                    order.price = price;
                }
                if let Some(volume_remain) = update.volume_remain {
                    order.volume_remain = volume_remain;
                }
                stats.updated += 1;
            }
        }

        inner.batches_applied += 1;

        Ok(stats)
    }

    async fn remove_orders(
        &self,
        region_id: RegionId,
        order_ids: Vec<OrderId>,
    ) -> SyncResult<Vec<Order>> {
        let mut inner = self.inner.lock().await;

        let mut removed = Vec::new();
        for order_id in order_ids {
            let belongs_here = inner
                .orders
                .get(&order_id)
                .is_some_and(|order| order.region_id == region_id);
            if belongs_here
                && let Some(order) = inner.orders.remove(&order_id)
            {
                removed.push(order);
            }
        }

        inner.removal_batches_applied += 1;

        Ok(removed)
    }

    async fn bump_price_watermarks(
        &self,
        type_ids: Vec<TypeId>,
        at: DateTime<Utc>,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        for type_id in type_ids {
            inner.watermarks.insert(type_id, at);
        }

        Ok(())
    }

    async fn price_watermark(&self, type_id: TypeId) -> SyncResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner.watermarks.get(&type_id).copied())
    }

    async fn upsert_location(&self, location: LocationRecord) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.locations.insert(location.location_id, location);

        Ok(())
    }

    async fn set_order_location_names(
        &self,
        location_id: LocationId,
        name: String,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        for order in inner.orders.values_mut() {
            if order.location_id == location_id {
                order.location_name = Some(name.clone());
            }
        }

        Ok(())
    }
}
