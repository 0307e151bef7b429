//! Order records as stored locally and as received from the feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LocationId, OrderId, RegionId, SystemId, TypeId};

/// Visibility range of an order.
///
/// The feed historically spelled the system-wide range as `solarsystem`; that
/// legacy spelling is accepted on input and normalized to `system` everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRange {
    Station,
    Region,
    #[serde(alias = "solarsystem")]
    System,
    #[serde(untagged)]
    Jumps(u8),
}

/// One resting buy/sell order, as kept in the local store.
///
/// Unique by `order_id` across the whole store. `price` and `volume_remain` are the
/// only fields updated in place after the first observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub type_id: TypeId,
    pub region_id: RegionId,
    pub price: f64,
    pub volume_remain: u64,
    pub is_buy_order: bool,
    pub location_id: LocationId,
    pub system_id: SystemId,
    pub range: OrderRange,
    pub issued: DateTime<Utc>,
    /// Denormalized display name of `location_id`, filled in lazily by the location
    /// resolver once the location metadata is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
}

/// An order as it appears on the wire.
///
/// The feed scopes requests by region, so the payload itself carries no region id.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedOrder {
    pub order_id: OrderId,
    pub type_id: TypeId,
    pub price: f64,
    pub volume_remain: u64,
    pub is_buy_order: bool,
    pub location_id: LocationId,
    pub system_id: SystemId,
    pub range: OrderRange,
    pub issued: DateTime<Utc>,
}

impl FeedOrder {
    /// Converts a wire order into a store order for the region it was fetched from.
    pub fn into_order(self, region_id: RegionId) -> Order {
        Order {
            order_id: self.order_id,
            type_id: self.type_id,
            region_id,
            price: self.price,
            volume_remain: self.volume_remain,
            is_buy_order: self.is_buy_order,
            location_id: self.location_id,
            system_id: self.system_id,
            range: self.range,
            issued: self.issued,
            location_name: None,
        }
    }
}

/// The subset of an order the reconciler diffs against.
///
/// A cycle snapshot projects each known order down to this digest; all other fields
/// are immutable after insertion and never need re-comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderDigest {
    pub price: f64,
    pub volume_remain: u64,
}

impl From<&Order> for OrderDigest {
    fn from(order: &Order) -> Self {
        Self {
            price: order.price,
            volume_remain: order.volume_remain,
        }
    }
}
