//! The authoritative order store surface.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::types::{LocationId, Order, OrderDigest, OrderId, RegionId, SystemId, TypeId};

/// A partial update of one order's mutable fields.
///
/// Only the fields that actually changed are set; the store applies each present
/// field and leaves the rest of the record untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub type_id: TypeId,
    pub price: Option<f64>,
    pub volume_remain: Option<u64>,
}

/// One region's staged writes for a page of reconciliation.
#[derive(Debug, Clone, Default)]
pub struct OrderWriteBatch {
    /// Orders not present in the cycle snapshot. Applied with set-on-insert
    /// semantics: when a concurrent observer already inserted the id, only price
    /// and volume are set so the richer record is not clobbered.
    pub upserts: Vec<Order>,
    /// Field updates for orders whose price or volume changed.
    pub updates: Vec<OrderUpdate>,
}

impl OrderWriteBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.updates.is_empty()
    }

    /// Returns the distinct item types touched by this batch.
    pub fn affected_type_ids(&self) -> Vec<TypeId> {
        let mut type_ids: Vec<TypeId> = self
            .upserts
            .iter()
            .map(|order| order.type_id)
            .chain(self.updates.iter().map(|update| update.type_id))
            .collect();
        type_ids.sort_unstable();
        type_ids.dedup();
        type_ids
    }
}

/// Counters reported by the store after applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub inserted: u64,
    pub updated: u64,
}

/// Lazily materialized metadata for a station or structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    pub location_id: LocationId,
    pub system_id: SystemId,
    pub name: String,
}

/// Trait for the document store holding the mirrored orders.
///
/// Implementations must enforce uniqueness by `order_id` across the whole store;
/// that constraint is the engine's consistency backstop against racing inserts of
/// the same id. Individual operations must be atomic, but callers serialize whole
/// batches through [`crate::write::WriteCoordinator`].
pub trait OrderStore {
    /// Loads the diff projection of every order currently known for a region.
    fn region_snapshot(
        &self,
        region_id: RegionId,
    ) -> impl Future<Output = SyncResult<HashMap<OrderId, OrderDigest>>> + Send;

    /// Applies one staged write batch and reports what was written.
    fn apply_batch(
        &self,
        batch: OrderWriteBatch,
    ) -> impl Future<Output = SyncResult<BatchStats>> + Send;

    /// Deletes the given orders from a region and returns the pre-delete records.
    ///
    /// Ids unknown to the store, or belonging to a different region, are ignored.
    fn remove_orders(
        &self,
        region_id: RegionId,
        order_ids: Vec<OrderId>,
    ) -> impl Future<Output = SyncResult<Vec<Order>>> + Send;

    /// Bumps the price watermark of each given item type to `at`.
    fn bump_price_watermarks(
        &self,
        type_ids: Vec<TypeId>,
        at: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the price watermark of an item type, if any order of that type was
    /// ever observed to change.
    fn price_watermark(
        &self,
        type_id: TypeId,
    ) -> impl Future<Output = SyncResult<Option<DateTime<Utc>>>> + Send;

    /// Inserts or replaces a location record.
    fn upsert_location(
        &self,
        location: LocationRecord,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Fills the denormalized `location_name` of every order at a location.
    fn set_order_location_names(
        &self,
        location_id: LocationId,
        name: String,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}
