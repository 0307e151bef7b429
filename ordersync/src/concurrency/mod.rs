//! Concurrency utilities for coordinating region synchronization.
//!
//! The engine runs many independent region loops that only meet at a handful of
//! shared resources. This module holds the primitives those loops coordinate
//! through, most importantly the broadcast-based shutdown signal that every loop
//! polls at its suspension points.

pub mod shutdown;
