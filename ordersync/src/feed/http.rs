//! HTTP implementation of the market feed transport.

use std::time::Duration;

use chrono::DateTime;
use reqwest::StatusCode;
use reqwest::header::{ETAG, EXPIRES, HeaderMap, IF_NONE_MATCH};
use serde::Deserialize;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::feed::client::{FeedPage, MarketFeed};
use crate::types::{FeedOrder, LocationId, RegionId, SystemId};

/// Header carrying the page-count hint for paginated listings.
const PAGES_HEADER: &str = "x-pages";

/// Location ids at or above this value are player-owned structures, whose names
/// are only visible to authorized characters.
const STRUCTURE_ID_FLOOR: LocationId = 70_000_000;

#[derive(Debug, Deserialize)]
struct NamedEntity {
    name: String,
}

/// Market feed transport over HTTP.
///
/// One instance is shared by the whole process; `reqwest::Client` already pools
/// connections internally.
#[derive(Debug, Clone)]
pub struct HttpMarketFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetches a reference entity and extracts its display name.
    ///
    /// Any non-success status maps to `None`: for reference lookups the caller
    /// falls back to a synthesized name rather than failing the batch.
    async fn fetch_name(&self, path: String) -> SyncResult<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let entity: NamedEntity = response.json().await?;
        Ok(Some(entity.name))
    }
}

impl MarketFeed for HttpMarketFeed {
    async fn fetch_regions(&self) -> SyncResult<Vec<RegionId>> {
        let url = format!("{}/universe/regions/", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                ErrorKind::FeedRequestFailed,
                "Region list request failed",
                format!("GET {url} returned {status}")
            );
        }

        let regions = response.json().await?;
        Ok(regions)
    }

    async fn fetch_orders_page(
        &self,
        region_id: RegionId,
        page: u32,
        validator: Option<&str>,
    ) -> SyncResult<FeedPage> {
        let url = format!(
            "{}/markets/{}/orders/?page={}",
            self.base_url, region_id, page
        );

        let mut request = self.client.get(&url);
        if let Some(validator) = validator {
            request = request.header(IF_NONE_MATCH, validator);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FeedPage::NotModified {
                pages: pages_hint(&headers),
                expires_in: expires_hint(&headers),
            });
        }

        if status == StatusCode::NOT_FOUND {
            return Ok(FeedPage::NotFound);
        }

        if status.is_server_error() {
            return Ok(FeedPage::ServerError {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            bail!(
                ErrorKind::FeedRequestFailed,
                "Order page request failed",
                format!("GET {url} returned {status}")
            );
        }

        let orders: Vec<FeedOrder> = response.json().await?;

        Ok(FeedPage::Ok {
            orders,
            validator: headers
                .get(ETAG)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            pages: pages_hint(&headers).unwrap_or(1),
            expires_in: expires_hint(&headers),
        })
    }

    async fn fetch_location_name(&self, location_id: LocationId) -> SyncResult<Option<String>> {
        // Structure names require authentication the engine does not carry; the
        // resolver synthesizes a fallback name from the owning system instead.
        if location_id >= STRUCTURE_ID_FLOOR {
            return Ok(None);
        }

        self.fetch_name(format!("/universe/stations/{location_id}/"))
            .await
    }

    async fn fetch_system_name(&self, system_id: SystemId) -> SyncResult<Option<String>> {
        self.fetch_name(format!("/universe/systems/{system_id}/"))
            .await
    }
}

/// Extracts the page-count hint from response headers.
fn pages_hint(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(PAGES_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Computes the remaining cache lifetime from the `expires` and `date` headers.
fn expires_hint(headers: &HeaderMap) -> Option<Duration> {
    let parse = |name| {
        headers
            .get(name)
            .and_then(|value: &reqwest::header::HeaderValue| value.to_str().ok())
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
    };

    let expires = parse(EXPIRES)?;
    let date = parse(reqwest::header::DATE)?;

    (expires - date).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn expires_hint_is_relative_to_the_server_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::DATE,
            HeaderValue::from_static("Wed, 01 Jul 2026 10:00:00 GMT"),
        );
        headers.insert(
            EXPIRES,
            HeaderValue::from_static("Wed, 01 Jul 2026 10:05:00 GMT"),
        );

        assert_eq!(expires_hint(&headers), Some(Duration::from_secs(300)));
    }

    #[test]
    fn expired_or_missing_hints_yield_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(expires_hint(&headers), None);

        headers.insert(
            reqwest::header::DATE,
            HeaderValue::from_static("Wed, 01 Jul 2026 10:05:00 GMT"),
        );
        headers.insert(
            EXPIRES,
            HeaderValue::from_static("Wed, 01 Jul 2026 10:00:00 GMT"),
        );
        assert_eq!(expires_hint(&headers), None);
    }

    #[test]
    fn pages_hint_parses_the_header() {
        let mut headers = HeaderMap::new();
        headers.insert(PAGES_HEADER, HeaderValue::from_static("17"));

        assert_eq!(pages_hint(&headers), Some(17));
    }
}
