use std::time::Duration;

use ordersync::feed::client::FeedPage;
use ordersync::notify::MemoryPublisher;
use ordersync::store::memory::MemoryOrderStore;
use ordersync::store::orders::OrderStore;
use ordersync::test_utils::feed::{MockFeed, feed_order};
use ordersync::test_utils::tracing::init_test_tracing;

use crate::support::{create_pipeline, stored_order, test_config, wait_until};

const REGION: u32 = 10000002;

#[tokio::test(flavor = "multi_thread")]
async fn cycle_inserts_updates_and_removes_orders() {
    init_test_tracing();

    // The store knows A (unchanged), B (stale price) and D (gone from the feed);
    // the feed serves A, B with a new price, and a brand new C.
    let store = MemoryOrderStore::new();
    store
        .seed_orders(vec![
            stored_order(1, REGION, 5.0, 100),
            stored_order(2, REGION, 9.0, 50),
            stored_order(4, REGION, 1.0, 10),
        ])
        .await;

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![
                feed_order(1, 5.0, 100),
                feed_order(2, 9.5, 50),
                feed_order(3, 2.5, 7),
            ],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );

    let publisher = MemoryPublisher::new();
    let mut events = publisher.subscribe("all");

    let mut pipeline = create_pipeline(test_config(), feed, store.clone(), publisher);
    pipeline.start().await.unwrap();

    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.order(4).await.is_none() && store.order(3).await.is_some() }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.order(1).await.unwrap().price, 5.0);
    assert_eq!(store.order(2).await.unwrap().price, 9.5);
    assert_eq!(store.order(3).await.unwrap().volume_remain, 7);
    assert_eq!(store.order_count().await, 3);

    // Exactly three events: the price update, the insert, and the removal.
    let mut actions = Vec::new();
    while let Ok(payload) = events.try_recv() {
        let payload: serde_json::Value = serde_json::from_str(&payload).unwrap();
        actions.push(payload);
    }
    assert_eq!(actions.len(), 3);
    assert!(
        actions
            .iter()
            .any(|p| p["action"] == "upsert" && p["order"]["order_id"] == 2)
    );
    assert!(
        actions
            .iter()
            .any(|p| p["action"] == "upsert" && p["order"]["order_id"] == 3)
    );
    assert!(
        actions
            .iter()
            .any(|p| p["action"] == "remove" && p["order_id"] == 4)
    );

    // A changed price must bump the type's watermark.
    assert!(store.price_watermark(34).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn all_pages_are_fetched_before_removals() {
    init_test_tracing();

    let store = MemoryOrderStore::new();
    store.seed_orders(vec![stored_order(99, REGION, 1.0, 1)]).await;

    let feed = MockFeed::new(vec![REGION]);
    for page in 1..=3u32 {
        feed.push_page(
            REGION,
            page,
            FeedPage::Ok {
                orders: vec![feed_order(u64::from(page) * 10, 5.0, 100)],
                validator: Some(format!("v{page}")),
                pages: 3,
                expires_in: Some(Duration::from_secs(300)),
            },
        );
    }

    let mut pipeline = create_pipeline(
        test_config(),
        feed.clone(),
        store.clone(),
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.order(99).await.is_none() }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    // Orders from every page survived; only the stale one was removed.
    assert_eq!(store.order_count().await, 3);
    for order_id in [10, 20, 30] {
        assert!(store.order(order_id).await.is_some());
    }

    let pages_called: Vec<u32> = feed.order_page_calls().iter().map(|c| c.page).collect();
    for page in 1..=3 {
        assert!(pages_called.contains(&page));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_pages_produce_no_store_traffic() {
    init_test_tracing();

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(1, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 1,
            expires_in: Some(Duration::from_millis(100)),
        },
    );
    // Everything after the first cycle is a not-modified short circuit.
    feed.push_page(
        REGION,
        1,
        FeedPage::NotModified {
            pages: Some(1),
            expires_in: Some(Duration::from_millis(100)),
        },
    );

    let store = MemoryOrderStore::new();
    let mut pipeline = create_pipeline(
        test_config(),
        feed.clone(),
        store.clone(),
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    // Wait for at least two full cycles.
    wait_until(Duration::from_secs(10), || {
        let feed = feed.clone();
        async move { feed.order_page_calls().len() >= 2 }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.order_count().await, 1);
    // Only the first cycle wrote anything, and no removal batch was ever issued.
    assert_eq!(store.batches_applied().await, 1);
    assert_eq!(store.removal_batches_applied().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_pages_disable_the_removal_pass() {
    init_test_tracing();

    // This order is on no feed page, but page 2 keeps failing, so the engine may
    // not conclude it is gone.
    let store = MemoryOrderStore::new();
    store.seed_orders(vec![stored_order(99, REGION, 1.0, 1)]).await;

    let feed = MockFeed::new(vec![REGION]);
    feed.push_page(
        REGION,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(10, 5.0, 100)],
            validator: Some("v1".into()),
            pages: 2,
            expires_in: Some(Duration::from_secs(300)),
        },
    );
    feed.push_page(REGION, 2, FeedPage::ServerError { status: 503 });

    let mut pipeline = create_pipeline(
        test_config(),
        feed.clone(),
        store.clone(),
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    // Two attempts on page 2 exhaust the retry budget.
    wait_until(Duration::from_secs(5), || {
        let feed = feed.clone();
        async move {
            feed.order_page_calls()
                .iter()
                .filter(|call| call.page == 2)
                .count()
                >= 2
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    pipeline.shutdown_and_wait().await.unwrap();

    // The fresh page was still applied, but nothing was removed.
    assert!(store.order(10).await.is_some());
    assert!(store.order(99).await.is_some());
    assert_eq!(store.removal_batches_applied().await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn regions_are_synchronized_independently() {
    init_test_tracing();

    // Each region has a stale order; removals in one region must not touch the
    // other region's orders, even though the ids overlap nowhere.
    let store = MemoryOrderStore::new();
    store
        .seed_orders(vec![stored_order(101, 1, 1.0, 1), stored_order(201, 2, 1.0, 1)])
        .await;

    let feed = MockFeed::new(vec![1, 2]);
    feed.push_page(
        1,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(102, 5.0, 100)],
            validator: Some("r1".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );
    feed.push_page(
        2,
        1,
        FeedPage::Ok {
            orders: vec![feed_order(202, 6.0, 100)],
            validator: Some("r2".into()),
            pages: 1,
            expires_in: Some(Duration::from_secs(300)),
        },
    );

    let mut pipeline = create_pipeline(
        test_config(),
        feed,
        store.clone(),
        MemoryPublisher::new(),
    );
    pipeline.start().await.unwrap();

    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        async move { store.order(101).await.is_none() && store.order(201).await.is_none() }
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.orders_in_region(1).await.len(), 1);
    assert_eq!(store.orders_in_region(2).await.len(), 1);
    assert!(store.order(102).await.is_some());
    assert!(store.order(202).await.is_some());
}
