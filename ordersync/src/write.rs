//! Serialized application of staged writes.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::SyncResult;
use crate::metrics::{ORDERS_REMOVED_TOTAL, REGION_ID_LABEL};
use crate::store::orders::{BatchStats, OrderStore, OrderWriteBatch};
use crate::types::{Order, OrderId, RegionId, TypeId};

/// Serializes all bulk store writes behind one lock.
///
/// Workers for different regions share one coordinator, so at most one bulk write
/// is in flight against the store at any time. The price watermark bump happens
/// under the same hold as the batch it belongs to, keeping watermarks consistent
/// with the orders that justified them.
#[derive(Debug)]
pub struct WriteCoordinator<S> {
    store: S,
    lock: Arc<Mutex<()>>,
}

impl<S: Clone> Clone for WriteCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<S> WriteCoordinator<S>
where
    S: OrderStore + Send + Sync,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Applies one staged batch and bumps the watermarks of the types it touched.
    pub async fn apply(&self, region_id: RegionId, batch: OrderWriteBatch) -> SyncResult<BatchStats> {
        if batch.is_empty() {
            return Ok(BatchStats::default());
        }

        let type_ids = batch.affected_type_ids();

        let _guard = self.lock.lock().await;
        let stats = self.store.apply_batch(batch).await?;
        self.store.bump_price_watermarks(type_ids, Utc::now()).await?;
        drop(_guard);

        debug!(
            region_id,
            inserted = stats.inserted,
            updated = stats.updated,
            "applied write batch"
        );

        Ok(stats)
    }

    /// Removes vanished orders and bumps the watermarks of their types.
    ///
    /// Returns the pre-delete records so the caller can publish removal events.
    pub async fn apply_removals(
        &self,
        region_id: RegionId,
        order_ids: Vec<OrderId>,
    ) -> SyncResult<Vec<Order>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().await;
        let removed = self.store.remove_orders(region_id, order_ids).await?;

        let mut type_ids: Vec<TypeId> = removed.iter().map(|order| order.type_id).collect();
        type_ids.sort_unstable();
        type_ids.dedup();
        self.store.bump_price_watermarks(type_ids, Utc::now()).await?;
        drop(_guard);

        counter!(ORDERS_REMOVED_TOTAL, REGION_ID_LABEL => region_id.to_string())
            .increment(removed.len() as u64);

        Ok(removed)
    }
}
