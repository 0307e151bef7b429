//! Configuration for the synchronization engine.
//!
//! Plain data structs deserialized from the environment or a config file. Every knob
//! has a default tuned for the upstream feed's documented limits, so an empty config
//! yields a working engine.

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// One entry of the time-of-day rate schedule.
///
/// `threshold` is a UTC time encoded as `hour * 100 + minute` (e.g. `1059` for
/// 10:59). The entry applies from its threshold onwards, until a later threshold
/// takes over.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RateWindow {
    /// UTC minute-of-day threshold encoded as `hour * 100 + minute`.
    pub threshold: u32,
    /// Calls per second permitted from this threshold onwards. Zero suspends feed
    /// access entirely.
    pub calls_per_second: u32,
}

/// Time-of-day rate schedule for the external feed.
///
/// The upstream operator publishes distinct ceilings for distinct UTC windows,
/// with a daily maintenance window during which access is suspended.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateScheduleConfig {
    /// Schedule entries, ordered by ascending threshold.
    #[serde(default = "default_rate_windows")]
    pub windows: Vec<RateWindow>,
    /// Manual override; when positive it takes precedence over the schedule.
    #[serde(default)]
    pub override_calls_per_second: Option<u32>,
}

impl Default for RateScheduleConfig {
    fn default() -> Self {
        Self {
            windows: default_rate_windows(),
            override_calls_per_second: None,
        }
    }
}

fn default_rate_windows() -> Vec<RateWindow> {
    // Upstream ceilings: full rate all day, suspended from 10:59 UTC until the
    // daily maintenance window ends at 11:10 UTC.
    vec![
        RateWindow {
            threshold: 0,
            calls_per_second: 20,
        },
        RateWindow {
            threshold: 1059,
            calls_per_second: 0,
        },
        RateWindow {
            threshold: 1110,
            calls_per_second: 20,
        },
    ]
}

/// Configuration for the region synchronization engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Time-of-day rate schedule for feed calls.
    #[serde(default)]
    pub rate: RateScheduleConfig,
    /// Maximum number of regions that may be actively fetching at once.
    #[serde(default = "default_max_concurrent_regions")]
    pub max_concurrent_regions: u16,
    /// Maximum number of pages fetched concurrently within one region cycle.
    #[serde(default = "default_max_concurrent_pages")]
    pub max_concurrent_pages: u16,
    /// Milliseconds between consecutive region worker launches at startup.
    #[serde(default = "default_launch_stagger_ms")]
    pub launch_stagger_ms: u64,
    /// Milliseconds between consecutive page fetch launches within one cycle.
    #[serde(default = "default_page_stagger_ms")]
    pub page_stagger_ms: u64,
    /// Number of attempts for a page fetch before the page is abandoned.
    #[serde(default = "default_page_fetch_attempts")]
    pub page_fetch_attempts: u32,
    /// Fixed back-off in milliseconds between page fetch attempts after a 5xx.
    #[serde(default = "default_page_retry_backoff_ms")]
    pub page_retry_backoff_ms: u64,
    /// Minimum cooldown in seconds between two cycles of the same region.
    #[serde(default = "default_cooldown_floor_secs")]
    pub cooldown_floor_secs: u64,
    /// Cooldown in seconds applied when the feed provides no cache-expiry hint.
    #[serde(default = "default_cooldown_fallback_secs")]
    pub cooldown_fallback_secs: u64,
}

impl SyncConfig {
    /// Default maximum number of concurrently fetching regions.
    pub const DEFAULT_MAX_CONCURRENT_REGIONS: u16 = 5;

    /// Default maximum number of concurrently fetching pages per region.
    pub const DEFAULT_MAX_CONCURRENT_PAGES: u16 = 5;

    /// Validates the configuration.
    ///
    /// The rate schedule must not be empty and must be sorted by threshold, since
    /// ceiling selection takes the last entry whose threshold is `<=` the current
    /// time. Concurrency limits must be non-zero.
    pub fn validate(&self) -> SyncResult<()> {
        if self.rate.windows.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Invalid rate schedule",
                "the rate schedule must contain at least one window"
            );
        }

        if !self.rate.windows.is_sorted_by_key(|w| w.threshold) {
            bail!(
                ErrorKind::ConfigError,
                "Invalid rate schedule",
                "rate schedule windows must be ordered by ascending threshold"
            );
        }

        if self.max_concurrent_regions == 0 || self.max_concurrent_pages == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Invalid concurrency limits",
                "max_concurrent_regions and max_concurrent_pages must be greater than 0"
            );
        }

        if self.page_fetch_attempts == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Invalid retry budget",
                "page_fetch_attempts must be greater than 0"
            );
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rate: RateScheduleConfig::default(),
            max_concurrent_regions: default_max_concurrent_regions(),
            max_concurrent_pages: default_max_concurrent_pages(),
            launch_stagger_ms: default_launch_stagger_ms(),
            page_stagger_ms: default_page_stagger_ms(),
            page_fetch_attempts: default_page_fetch_attempts(),
            page_retry_backoff_ms: default_page_retry_backoff_ms(),
            cooldown_floor_secs: default_cooldown_floor_secs(),
            cooldown_fallback_secs: default_cooldown_fallback_secs(),
        }
    }
}

fn default_max_concurrent_regions() -> u16 {
    SyncConfig::DEFAULT_MAX_CONCURRENT_REGIONS
}

fn default_max_concurrent_pages() -> u16 {
    SyncConfig::DEFAULT_MAX_CONCURRENT_PAGES
}

fn default_launch_stagger_ms() -> u64 {
    250
}

fn default_page_stagger_ms() -> u64 {
    100
}

fn default_page_fetch_attempts() -> u32 {
    3
}

fn default_page_retry_backoff_ms() -> u64 {
    2000
}

fn default_cooldown_floor_secs() -> u64 {
    30
}

fn default_cooldown_fallback_secs() -> u64 {
    900
}
