#![cfg(feature = "test-utils")]

mod support;

mod lifecycle_test;
mod sync_cycle_test;
