//! Change events emitted by the reconciler.

use crate::types::{Order, OrderId, RegionId, TypeId};

/// A single observed change to an order.
///
/// Upserts carry the full order so subscribers can render the row directly.
/// Removals carry only the identifying fields; subscribers typically just retract a
/// previously rendered row, and the topic keys need the type and region.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Upsert(Order),
    Remove {
        order_id: OrderId,
        type_id: TypeId,
        region_id: RegionId,
    },
}

impl ChangeEvent {
    /// Builds a removal event from the pre-delete record.
    pub fn removal_of(order: &Order) -> Self {
        Self::Remove {
            order_id: order.order_id,
            type_id: order.type_id,
            region_id: order.region_id,
        }
    }

    /// Returns the item type this event concerns.
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::Upsert(order) => order.type_id,
            Self::Remove { type_id, .. } => *type_id,
        }
    }

    /// Returns the region this event concerns.
    pub fn region_id(&self) -> RegionId {
        match self {
            Self::Upsert(order) => order.region_id,
            Self::Remove { region_id, .. } => *region_id,
        }
    }
}
