//! Order store abstraction and implementations.

pub mod memory;
pub mod orders;
