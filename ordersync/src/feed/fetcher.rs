//! Conditional page fetching with validator caching and retry handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::feed::client::{FeedPage, MarketFeed};
use crate::feed::rate_gate::RateGate;
use crate::types::{Order, OrderId, RegionId};

/// Validator and last-observed order ids stored for one `(region, page)` key.
#[derive(Debug, Clone)]
struct StoredPage {
    validator: String,
    order_ids: Vec<OrderId>,
}

/// Process-lifetime cache of conditional-request validators.
///
/// Unbounded by design: cardinality is bounded externally by the number of regions
/// times their page counts. Entries are cleared when the upstream reports a page as
/// gone (404), and replaced wholesale on every successful fetch.
#[derive(Debug, Clone, Default)]
pub struct PageValidatorCache {
    inner: Arc<Mutex<HashMap<(RegionId, u32), StoredPage>>>,
}

impl PageValidatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored validator for a page key, if any.
    fn validator(&self, region_id: RegionId, page: u32) -> Option<String> {
        let inner = self.inner.lock().expect("validator cache lock poisoned");
        inner.get(&(region_id, page)).map(|s| s.validator.clone())
    }

    /// Returns the order ids last observed on a page.
    fn known_ids(&self, region_id: RegionId, page: u32) -> Vec<OrderId> {
        let inner = self.inner.lock().expect("validator cache lock poisoned");
        inner
            .get(&(region_id, page))
            .map(|s| s.order_ids.clone())
            .unwrap_or_default()
    }

    /// Returns the highest page number currently stored for a region.
    ///
    /// Used as the page-count fallback when a not-modified response for page one
    /// carries no page-count hint.
    fn max_page(&self, region_id: RegionId) -> Option<u32> {
        let inner = self.inner.lock().expect("validator cache lock poisoned");
        inner
            .keys()
            .filter(|(region, _)| *region == region_id)
            .map(|(_, page)| *page)
            .max()
    }

    fn store(&self, region_id: RegionId, page: u32, validator: String, order_ids: Vec<OrderId>) {
        let mut inner = self.inner.lock().expect("validator cache lock poisoned");
        inner.insert(
            (region_id, page),
            StoredPage {
                validator,
                order_ids,
            },
        );
    }

    fn clear(&self, region_id: RegionId, page: u32) {
        let mut inner = self.inner.lock().expect("validator cache lock poisoned");
        inner.remove(&(region_id, page));
    }
}

/// Outcome of one conditional page fetch, after retries.
#[derive(Debug)]
pub enum PageFetch {
    /// Fresh page content, already converted to store orders and stripped of
    /// fully-filled records.
    Fetched {
        orders: Vec<Order>,
        pages: u32,
        expires_in: Option<Duration>,
    },
    /// The page matches the stored validator; `known_ids` are the ids last observed
    /// on it, to be treated as still present without any store traffic.
    NotModified {
        known_ids: Vec<OrderId>,
        pages: Option<u32>,
        expires_in: Option<Duration>,
    },
    /// The page no longer exists.
    NotFound,
    /// The retry budget was exhausted on transient upstream failures.
    Failed { status: u16 },
}

#[derive(Debug)]
struct FetcherInner<F> {
    feed: F,
    gate: Arc<RateGate>,
    validators: PageValidatorCache,
    attempts: u32,
    retry_backoff: Duration,
}

/// Paginated fetcher with conditional caching.
///
/// Wraps the raw transport with the stored-validator exchange, the zero-volume
/// discard, and a fixed-back-off retry budget for transient upstream failures.
/// Every attempt passes through the shared [`RateGate`] first.
#[derive(Debug)]
pub struct ConditionalFetcher<F> {
    inner: Arc<FetcherInner<F>>,
}

impl<F> Clone for ConditionalFetcher<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F> ConditionalFetcher<F>
where
    F: MarketFeed + Send + Sync,
{
    pub fn new(feed: F, gate: Arc<RateGate>, attempts: u32, retry_backoff: Duration) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                feed,
                gate,
                validators: PageValidatorCache::new(),
                attempts,
                retry_backoff,
            }),
        }
    }

    /// Fetches one page of a region's order listing.
    ///
    /// Transient upstream failures are retried with a fixed back-off until the
    /// attempt budget runs out, at which point [`PageFetch::Failed`] is returned and
    /// the caller decides how the cycle proceeds. Transport and parse errors abort
    /// the fetch immediately.
    pub async fn fetch_page(&self, region_id: RegionId, page: u32) -> SyncResult<PageFetch> {
        let mut last_status = 0;

        for attempt in 1..=self.inner.attempts {
            self.inner.gate.acquire().await;

            let validator = self.inner.validators.validator(region_id, page);
            let response = self
                .inner
                .feed
                .fetch_orders_page(region_id, page, validator.as_deref())
                .await?;

            match response {
                FeedPage::Ok {
                    orders,
                    validator,
                    pages,
                    expires_in,
                } => {
                    // A fully filled order is logically already gone: it is neither
                    // written nor recorded against the page key, so a later
                    // not-modified response keeps treating it as absent.
                    let orders: Vec<Order> = orders
                        .into_iter()
                        .map(|order| order.into_order(region_id))
                        .filter(|order| order.volume_remain > 0)
                        .collect();

                    let order_ids: Vec<OrderId> =
                        orders.iter().map(|order| order.order_id).collect();
                    match validator {
                        Some(validator) => {
                            self.inner
                                .validators
                                .store(region_id, page, validator, order_ids)
                        }
                        None => self.inner.validators.clear(region_id, page),
                    }

                    return Ok(PageFetch::Fetched {
                        orders,
                        pages,
                        expires_in,
                    });
                }
                FeedPage::NotModified { pages, expires_in } => {
                    let known_ids = self.inner.validators.known_ids(region_id, page);
                    let pages = pages.or_else(|| self.inner.validators.max_page(region_id));

                    debug!(region_id, page, "page not modified");

                    return Ok(PageFetch::NotModified {
                        known_ids,
                        pages,
                        expires_in,
                    });
                }
                FeedPage::NotFound => {
                    self.inner.validators.clear(region_id, page);

                    debug!(region_id, page, "page no longer exists");

                    return Ok(PageFetch::NotFound);
                }
                FeedPage::ServerError { status } => {
                    last_status = status;

                    warn!(
                        region_id,
                        page, status, attempt, "transient upstream failure fetching page"
                    );

                    if attempt < self.inner.attempts {
                        sleep(self.inner.retry_backoff).await;
                    }
                }
            }
        }

        Ok(PageFetch::Failed {
            status: last_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateScheduleConfig, RateWindow};
    use crate::feed::rate_gate::RateSchedule;
    use crate::test_utils::feed::MockFeed;
    use crate::types::FeedOrder;
    use chrono::Utc;

    fn test_gate() -> Arc<RateGate> {
        // A very high ceiling keeps the gate out of the way of fetcher tests.
        Arc::new(RateGate::new(RateSchedule::from_config(
            &RateScheduleConfig {
                windows: vec![RateWindow {
                    threshold: 0,
                    calls_per_second: 100_000,
                }],
                override_calls_per_second: None,
            },
        )))
    }

    fn feed_order(order_id: OrderId, volume_remain: u64) -> FeedOrder {
        serde_json::from_value(serde_json::json!({
            "order_id": order_id,
            "type_id": 34,
            "price": 5.0,
            "volume_remain": volume_remain,
            "is_buy_order": false,
            "location_id": 60003760u64,
            "system_id": 30000142u32,
            "range": "region",
            "issued": Utc::now(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn zero_volume_orders_are_discarded_and_not_recorded() {
        let feed = MockFeed::new(vec![1]);
        feed.push_page(
            1,
            1,
            FeedPage::Ok {
                orders: vec![feed_order(10, 100), feed_order(11, 0)],
                validator: Some("v1".into()),
                pages: 1,
                expires_in: None,
            },
        );
        feed.push_page(
            1,
            1,
            FeedPage::NotModified {
                pages: Some(1),
                expires_in: None,
            },
        );

        let fetcher = ConditionalFetcher::new(feed, test_gate(), 3, Duration::from_millis(1));

        let first = fetcher.fetch_page(1, 1).await.unwrap();
        let PageFetch::Fetched { orders, .. } = first else {
            panic!("expected fetched page");
        };
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, 10);

        // The discarded order must not resurface through the not-modified path.
        let second = fetcher.fetch_page(1, 1).await.unwrap();
        let PageFetch::NotModified { known_ids, .. } = second else {
            panic!("expected not-modified page");
        };
        assert_eq!(known_ids, vec![10]);
    }

    #[tokio::test]
    async fn stored_validator_is_attached_to_subsequent_requests() {
        let feed = MockFeed::new(vec![1]);
        feed.push_page(
            1,
            1,
            FeedPage::Ok {
                orders: vec![feed_order(10, 100)],
                validator: Some("v1".into()),
                pages: 1,
                expires_in: None,
            },
        );
        feed.push_page(
            1,
            1,
            FeedPage::NotModified {
                pages: Some(1),
                expires_in: None,
            },
        );

        let fetcher =
            ConditionalFetcher::new(feed.clone(), test_gate(), 3, Duration::from_millis(1));

        fetcher.fetch_page(1, 1).await.unwrap();
        fetcher.fetch_page(1, 1).await.unwrap();

        let calls = feed.order_page_calls();
        assert_eq!(calls[0].validator, None);
        assert_eq!(calls[1].validator, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn not_found_clears_the_stored_page_key() {
        let feed = MockFeed::new(vec![1]);
        feed.push_page(
            1,
            2,
            FeedPage::Ok {
                orders: vec![feed_order(10, 100)],
                validator: Some("v1".into()),
                pages: 2,
                expires_in: None,
            },
        );
        feed.push_page(1, 2, FeedPage::NotFound);
        feed.push_page(
            1,
            2,
            FeedPage::Ok {
                orders: vec![],
                validator: Some("v2".into()),
                pages: 2,
                expires_in: None,
            },
        );

        let fetcher =
            ConditionalFetcher::new(feed.clone(), test_gate(), 3, Duration::from_millis(1));

        fetcher.fetch_page(1, 2).await.unwrap();
        let gone = fetcher.fetch_page(1, 2).await.unwrap();
        assert!(matches!(gone, PageFetch::NotFound));

        // After the 404 the validator must be gone from the request.
        fetcher.fetch_page(1, 2).await.unwrap();
        let calls = feed.order_page_calls();
        assert_eq!(calls[2].validator, None);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_returns_failed() {
        let feed = MockFeed::new(vec![1]);
        feed.push_page(1, 1, FeedPage::ServerError { status: 503 });

        let fetcher =
            ConditionalFetcher::new(feed.clone(), test_gate(), 3, Duration::from_millis(1));

        let result = fetcher.fetch_page(1, 1).await.unwrap();
        let PageFetch::Failed { status } = result else {
            panic!("expected failed page");
        };
        assert_eq!(status, 503);
        assert_eq!(feed.order_page_calls().len(), 3);
    }
}
