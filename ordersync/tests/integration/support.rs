//! Shared fixtures for the integration tests.

use std::time::Duration;

use ordersync::cache::MemoryCooldownCache;
use ordersync::config::{RateScheduleConfig, RateWindow, SyncConfig};
use ordersync::notify::MemoryPublisher;
use ordersync::pipeline::SyncPipeline;
use ordersync::store::memory::MemoryOrderStore;
use ordersync::test_utils::feed::MockFeed;
use ordersync::types::{Order, OrderRange};
use chrono::Utc;

pub type TestPipeline = SyncPipeline<MockFeed, MemoryOrderStore, MemoryCooldownCache, MemoryPublisher>;

/// Config tuned so cycles run back to back within a test's patience.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        rate: RateScheduleConfig {
            // An effectively unlimited ceiling keeps the gate out of timing.
            windows: vec![RateWindow {
                threshold: 0,
                calls_per_second: 100_000,
            }],
            override_calls_per_second: None,
        },
        max_concurrent_regions: 5,
        max_concurrent_pages: 5,
        launch_stagger_ms: 1,
        page_stagger_ms: 1,
        page_fetch_attempts: 2,
        page_retry_backoff_ms: 1,
        cooldown_floor_secs: 1,
        cooldown_fallback_secs: 1,
    }
}

pub fn create_pipeline(
    config: SyncConfig,
    feed: MockFeed,
    store: MemoryOrderStore,
    publisher: MemoryPublisher,
) -> TestPipeline {
    SyncPipeline::new(config, feed, store, MemoryCooldownCache::new(), publisher)
}

/// Builds a stored order with plausible defaults.
pub fn stored_order(order_id: u64, region_id: u32, price: f64, volume_remain: u64) -> Order {
    Order {
        order_id,
        type_id: 34,
        region_id,
        price,
        volume_remain,
        is_buy_order: false,
        location_id: 60003760,
        system_id: 30000142,
        range: OrderRange::Region,
        issued: Utc::now(),
        location_name: None,
    }
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
