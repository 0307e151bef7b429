//! Scripted in-memory market feed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::SyncResult;
use crate::feed::client::{FeedPage, MarketFeed};
use crate::types::{FeedOrder, LocationId, RegionId, SystemId};

/// One recorded order-page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub region_id: RegionId,
    pub page: u32,
    pub validator: Option<String>,
}

#[derive(Debug, Default)]
struct MockFeedInner {
    regions: Vec<RegionId>,
    pages: HashMap<(RegionId, u32), VecDeque<FeedPage>>,
    location_names: HashMap<LocationId, String>,
    system_names: HashMap<SystemId, String>,
    order_page_calls: Vec<RecordedCall>,
    location_name_calls: usize,
    system_name_calls: usize,
}

/// Scripted [`MarketFeed`] for tests.
///
/// Pages are scripted per `(region, page)` key as a queue of responses. Each fetch
/// consumes the front of the queue, except that the last scripted response repeats
/// forever; this lets a test script "one fresh page, then not-modified" without
/// counting how often the engine will poll. An unscripted page behaves as missing
/// and yields a not-found response.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    inner: Arc<Mutex<MockFeedInner>>,
}

impl MockFeed {
    pub fn new(regions: Vec<RegionId>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockFeedInner {
                regions,
                ..Default::default()
            })),
        }
    }

    /// Appends a scripted response for a page.
    pub fn push_page(&self, region_id: RegionId, page: u32, response: FeedPage) {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner
            .pages
            .entry((region_id, page))
            .or_default()
            .push_back(response);
    }

    pub fn set_location_name(&self, location_id: LocationId, name: &str) {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.location_names.insert(location_id, name.to_string());
    }

    pub fn set_system_name(&self, system_id: SystemId, name: &str) {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.system_names.insert(system_id, name.to_string());
    }

    /// Returns every order-page request observed so far, in order.
    pub fn order_page_calls(&self) -> Vec<RecordedCall> {
        let inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.order_page_calls.clone()
    }

    pub fn location_name_calls(&self) -> usize {
        let inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.location_name_calls
    }

    pub fn system_name_calls(&self) -> usize {
        let inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.system_name_calls
    }
}

impl MarketFeed for MockFeed {
    async fn fetch_regions(&self) -> SyncResult<Vec<RegionId>> {
        let inner = self.inner.lock().expect("mock feed lock poisoned");
        Ok(inner.regions.clone())
    }

    async fn fetch_orders_page(
        &self,
        region_id: RegionId,
        page: u32,
        validator: Option<&str>,
    ) -> SyncResult<FeedPage> {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.order_page_calls.push(RecordedCall {
            region_id,
            page,
            validator: validator.map(str::to_string),
        });

        let Some(queue) = inner.pages.get_mut(&(region_id, page)) else {
            return Ok(FeedPage::NotFound);
        };

        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        Ok(response.unwrap_or(FeedPage::NotFound))
    }

    async fn fetch_location_name(&self, location_id: LocationId) -> SyncResult<Option<String>> {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.location_name_calls += 1;

        Ok(inner.location_names.get(&location_id).cloned())
    }

    async fn fetch_system_name(&self, system_id: SystemId) -> SyncResult<Option<String>> {
        let mut inner = self.inner.lock().expect("mock feed lock poisoned");
        inner.system_name_calls += 1;

        Ok(inner.system_names.get(&system_id).cloned())
    }
}

/// Builds a wire order with plausible defaults.
pub fn feed_order(order_id: u64, price: f64, volume_remain: u64) -> FeedOrder {
    serde_json::from_value(serde_json::json!({
        "order_id": order_id,
        "type_id": 34,
        "price": price,
        "volume_remain": volume_remain,
        "is_buy_order": false,
        "location_id": 60003760u64,
        "system_id": 30000142u32,
        "range": "region",
        "issued": "2026-08-01T12:00:00Z",
    }))
    .expect("valid feed order")
}
