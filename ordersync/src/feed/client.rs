//! Transport abstraction for the upstream market feed.

use std::future::Future;
use std::time::Duration;

use crate::error::SyncResult;
use crate::types::{FeedOrder, LocationId, RegionId, SystemId};

/// One order-listing page as returned by the transport.
///
/// The variants map one-to-one onto the upstream status codes the engine cares
/// about; anything else surfaces as a transport error.
#[derive(Debug, Clone)]
pub enum FeedPage {
    /// 200: a full page of orders, with the new cache validator and the page-count
    /// and cache-expiry hints from the response headers.
    Ok {
        orders: Vec<FeedOrder>,
        validator: Option<String>,
        pages: u32,
        expires_in: Option<Duration>,
    },
    /// 304: the page matches the validator sent with the request. The page-count
    /// and expiry hints are still present on such responses when the upstream
    /// provides them.
    NotModified {
        pages: Option<u32>,
        expires_in: Option<Duration>,
    },
    /// 404: the page no longer exists (the region's listing shrank).
    NotFound,
    /// 5xx: transient upstream failure.
    ServerError { status: u16 },
}

/// Raw access to the market feed.
///
/// Implementations perform single requests with no retry or caching policy of their
/// own; those concerns belong to [`crate::feed::fetcher::ConditionalFetcher`].
/// Rate limiting is also a caller concern so that the gate covers every call site
/// uniformly.
pub trait MarketFeed {
    /// Fetches the full list of region ids from the reference endpoint.
    fn fetch_regions(&self) -> impl Future<Output = SyncResult<Vec<RegionId>>> + Send;

    /// Fetches one page of a region's order listing, attaching `validator` as the
    /// conditional request header when present.
    fn fetch_orders_page(
        &self,
        region_id: RegionId,
        page: u32,
        validator: Option<&str>,
    ) -> impl Future<Output = SyncResult<FeedPage>> + Send;

    /// Looks up the display name of a station or structure.
    ///
    /// Returns `Ok(None)` when the location exists but its name is not accessible,
    /// which is the normal case for player-owned structures.
    fn fetch_location_name(
        &self,
        location_id: LocationId,
    ) -> impl Future<Output = SyncResult<Option<String>>> + Send;

    /// Looks up the display name of a solar system.
    fn fetch_system_name(
        &self,
        system_id: SystemId,
    ) -> impl Future<Output = SyncResult<Option<String>>> + Send;
}
