//! Metric names and labels exposed by the engine.

/// Label carrying the region an observation belongs to.
pub const REGION_ID_LABEL: &str = "region_id";

/// Orders inserted into the store.
pub const ORDERS_INSERTED_TOTAL: &str = "ordersync_orders_inserted_total";

/// Orders whose price or volume was updated in place.
pub const ORDERS_UPDATED_TOTAL: &str = "ordersync_orders_updated_total";

/// Orders removed after vanishing from the feed.
pub const ORDERS_REMOVED_TOTAL: &str = "ordersync_orders_removed_total";

/// Completed region sync cycles.
pub const SYNC_CYCLES_TOTAL: &str = "ordersync_sync_cycles_total";

/// Region sync cycles that abandoned at least one page.
pub const SYNC_CYCLES_DEGRADED_TOTAL: &str = "ordersync_sync_cycles_degraded_total";
