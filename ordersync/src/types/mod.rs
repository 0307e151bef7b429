//! Core domain types shared across the engine.

mod event;
mod order;

pub use event::ChangeEvent;
pub use order::{FeedOrder, Order, OrderDigest, OrderRange};

/// Unique, stable identifier of a resting order across sync cycles.
pub type OrderId = u64;

/// Identifier of a market region, the unit of independent synchronization.
pub type RegionId = u32;

/// Identifier of an item type.
pub type TypeId = u32;

/// Identifier of a station or player-owned structure.
pub type LocationId = u64;

/// Identifier of a solar system.
pub type SystemId = u32;
