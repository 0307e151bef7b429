use std::time::Duration;

use ordersync::cache::{CooldownCache, MemoryCooldownCache, region_cooldown_key};
use ordersync::error::{ErrorKind, SyncResult};
use ordersync::feed::client::FeedPage;
use ordersync::notify::MemoryPublisher;
use ordersync::pipeline::SyncPipeline;
use ordersync::store::memory::MemoryOrderStore;
use ordersync::sync_error;
use ordersync::test_utils::feed::{MockFeed, feed_order};
use ordersync::test_utils::tracing::init_test_tracing;

use crate::support::{create_pipeline, test_config, wait_until};

const REGION: u32 = 10000002;

/// Cooldown cache whose backing service is down: every operation fails.
#[derive(Debug, Clone, Default)]
struct UnreachableCooldownCache;

impl CooldownCache for UnreachableCooldownCache {
    async fn set_with_ttl(&self, _key: String, _ttl: Duration) -> SyncResult<()> {
        Err(sync_error!(
            ErrorKind::CacheWriteFailed,
            "Cooldown cache unreachable"
        ))
    }

    async fn remaining_ttl(&self, _key: &str) -> SyncResult<Option<Duration>> {
        Err(sync_error!(
            ErrorKind::CacheReadFailed,
            "Cooldown cache unreachable"
        ))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_shuts_down_promptly() {
    init_test_tracing();

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(1, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );

    let store = MemoryOrderStore::new();
    let mut pipeline = create_pipeline(test_config(), feed, store.clone(), MemoryPublisher::new());
    pipeline.start().await.unwrap();

    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.order(1).await.is_some() }
    })
    .await;

    // The worker is deep inside its cooldown sleep; shutdown must still return
    // within a test's patience rather than after the cooldown.
    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown_and_wait())
        .await
        .expect("shutdown timed out")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn existing_cooldowns_are_honored_before_any_fetch() {
    init_test_tracing();

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(1, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );

    // A previous process left a long cooldown behind.
    let cooldowns = MemoryCooldownCache::new();
    cooldowns
        .set_with_ttl(region_cooldown_key(REGION), Duration::from_secs(300))
        .await
        .unwrap();

    let store = MemoryOrderStore::new();
    let mut pipeline = SyncPipeline::new(
        test_config(),
        feed.clone(),
        store.clone(),
        cooldowns,
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert!(feed.order_page_calls().is_empty());
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_outage_degrades_to_local_cooldowns() {
    init_test_tracing();

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(1, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(1)),
        },
    );

    let store = MemoryOrderStore::new();
    let mut pipeline = SyncPipeline::new(
        test_config(),
        feed.clone(),
        store.clone(),
        UnreachableCooldownCache,
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    // A dead cooldown cache must not kill the worker: it falls back to sleeping
    // the floor locally and keeps cycling.
    wait_until(Duration::from_secs(10), || {
        let feed = feed.clone();
        async move { feed.order_page_calls().len() >= 2 }
    })
    .await;

    assert!(store.order(1).await.is_some());

    tokio::time::timeout(Duration::from_secs(5), pipeline.shutdown_and_wait())
        .await
        .expect("shutdown timed out")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn location_names_are_backfilled_after_insertion() {
    init_test_tracing();

    let feed = MockFeed::new(vec![REGION]);
    feed.set_location_name(60003760, "Jita IV - Moon 4");
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(1, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );

    let store = MemoryOrderStore::new();
    let mut pipeline = create_pipeline(test_config(), feed, store.clone(), MemoryPublisher::new());
    pipeline.start().await.unwrap();

    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move {
            store
                .order(1)
                .await
                .is_some_and(|order| order.location_name.is_some())
        }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        store.order(1).await.unwrap().location_name.as_deref(),
        Some("Jita IV - Moon 4")
    );
    assert_eq!(
        store.location(60003760).await.unwrap().name,
        "Jita IV - Moon 4"
    );
}
