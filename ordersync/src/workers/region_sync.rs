//! The long-lived worker synchronizing one region.
//!
//! Each worker owns its region for the lifetime of the pipeline and repeats the
//! same cycle: honor the region's cooldown, take a global sync permit, fetch all
//! pages under the shared rate gate, reconcile the pages against the stored state,
//! and schedule the next cycle from the feed's cache-expiry hint.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{Semaphore, watch};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tracing::{Instrument, info, info_span, warn};

use crate::cache::{CooldownCache, region_cooldown_key};
use crate::concurrency::shutdown::ShutdownRx;
use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncResult};
use crate::feed::client::MarketFeed;
use crate::feed::fetcher::{ConditionalFetcher, PageFetch};
use crate::metrics::{
    ORDERS_INSERTED_TOTAL, ORDERS_UPDATED_TOTAL, REGION_ID_LABEL, SYNC_CYCLES_DEGRADED_TOTAL,
    SYNC_CYCLES_TOTAL,
};
use crate::notify::{ChangeNotifier, Publisher};
use crate::reconcile::{CycleStats, Reconciler, RemovalPass};
use crate::resolve::LocationResolver;
use crate::store::orders::OrderStore;
use crate::sync_error;
use crate::types::{ChangeEvent, Order, RegionId};
use crate::write::WriteCoordinator;

/// Externally observable phase of a region sync worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSyncPhase {
    /// Not yet launched or between phases.
    Idle,
    /// Waiting out the region's cooldown.
    CoolingDown,
    /// Fetching and diffing pages.
    Fetching,
    /// Finishing the cycle and applying removals.
    Reconciling,
}

/// Handle to a spawned region sync worker.
#[derive(Debug)]
pub struct RegionSyncWorkerHandle {
    phase: watch::Receiver<RegionSyncPhase>,
    abort_handle: AbortHandle,
}

impl RegionSyncWorkerHandle {
    pub fn new(phase: watch::Receiver<RegionSyncPhase>, abort_handle: AbortHandle) -> Self {
        Self {
            phase,
            abort_handle,
        }
    }

    /// Returns the worker's current phase.
    pub fn phase(&self) -> RegionSyncPhase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.abort_handle.is_finished()
    }
}

/// Worker that keeps one region's orders synchronized.
#[derive(Debug)]
pub struct RegionSyncWorker<F, S, C, P> {
    region_id: RegionId,
    config: Arc<SyncConfig>,
    store: S,
    fetcher: ConditionalFetcher<F>,
    coordinator: WriteCoordinator<S>,
    notifier: ChangeNotifier<P>,
    resolver: LocationResolver<F, S>,
    cooldowns: C,
    /// Global permit pool bounding how many regions fetch at once.
    sync_permits: Arc<Semaphore>,
    shutdown_rx: ShutdownRx,
    /// Startup delay desynchronizing this worker from its siblings.
    launch_delay: Duration,
    phase_tx: watch::Sender<RegionSyncPhase>,
    phase_rx: watch::Receiver<RegionSyncPhase>,
}

impl<F, S, C, P> RegionSyncWorker<F, S, C, P>
where
    F: MarketFeed + Clone + Send + Sync + 'static,
    S: OrderStore + Clone + Send + Sync + 'static,
    C: CooldownCache + Send + Sync + 'static,
    P: Publisher + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        region_id: RegionId,
        config: Arc<SyncConfig>,
        store: S,
        fetcher: ConditionalFetcher<F>,
        coordinator: WriteCoordinator<S>,
        notifier: ChangeNotifier<P>,
        resolver: LocationResolver<F, S>,
        cooldowns: C,
        sync_permits: Arc<Semaphore>,
        shutdown_rx: ShutdownRx,
        launch_delay: Duration,
    ) -> Self {
        let (phase_tx, phase_rx) = watch::channel(RegionSyncPhase::Idle);

        Self {
            region_id,
            config,
            store,
            fetcher,
            coordinator,
            notifier,
            resolver,
            cooldowns,
            sync_permits,
            shutdown_rx,
            launch_delay,
            phase_tx,
            phase_rx,
        }
    }

    /// Returns a watch on the worker's phase, for the pool handle.
    pub fn phase_watch(&self) -> watch::Receiver<RegionSyncPhase> {
        self.phase_rx.clone()
    }

    /// Runs the worker until shutdown.
    pub async fn run(self) -> SyncResult<()> {
        let span = info_span!("region_sync_worker", region_id = self.region_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> SyncResult<()> {
        // Desynchronize worker launches so the first cycles do not all contend for
        // the rate gate at the same instant.
        tokio::select! {
            _ = sleep(self.launch_delay) => {}
            _ = self.shutdown_rx.wait_for_shutdown() => return Ok(()),
        }

        info!("starting region sync worker");

        loop {
            if self.shutdown_rx.is_shutdown() {
                info!("shutting down region sync worker");
                return Ok(());
            }

            // A live cooldown entry from a previous cycle (or a previous process)
            // is honored before any feed traffic. A cache read failure must not
            // kill the worker: assume the floor so an unreachable cache degrades
            // into a slower loop, not a dead region.
            let cooldown_key = region_cooldown_key(self.region_id);
            let remaining = match self.cooldowns.remaining_ttl(&cooldown_key).await {
                Ok(remaining) => remaining,
                Err(err) => {
                    warn!("failed to read region cooldown, assuming the floor: {err}");
                    Some(Duration::from_secs(self.config.cooldown_floor_secs))
                }
            };
            if let Some(remaining) = remaining {
                self.set_phase(RegionSyncPhase::CoolingDown);

                tokio::select! {
                    _ = sleep(remaining) => {}
                    _ = self.shutdown_rx.wait_for_shutdown() => {
                        info!("shutting down region sync worker");
                        return Ok(());
                    }
                }
            }

            let permit = tokio::select! {
                permit = self.sync_permits.acquire() => permit.map_err(|_| {
                    sync_error!(ErrorKind::InvalidState, "Region sync permit pool closed")
                })?,
                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!("shutting down region sync worker");
                    return Ok(());
                }
            };

            let cycle_start = Instant::now();
            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome,
                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!("shutting down region sync worker mid-cycle");
                    return Ok(());
                }
            };
            drop(permit);

            let cooldown = match outcome {
                Ok(expires_in) => next_cooldown(&self.config, expires_in, cycle_start.elapsed()),
                Err(err) => {
                    warn!("region sync cycle failed: {err}");
                    Duration::from_secs(self.config.cooldown_floor_secs)
                }
            };

            // The cooldown lives in the shared cache so a restarted process does
            // not hammer the feed; the top of the loop sleeps it out. When the
            // cache cannot be written, the cooldown is slept out locally instead.
            if let Err(err) = self.cooldowns.set_with_ttl(cooldown_key, cooldown).await {
                warn!("failed to persist region cooldown, sleeping it out locally: {err}");

                self.set_phase(RegionSyncPhase::CoolingDown);
                tokio::select! {
                    _ = sleep(cooldown) => {}
                    _ = self.shutdown_rx.wait_for_shutdown() => {
                        info!("shutting down region sync worker");
                        return Ok(());
                    }
                }
            }
            self.set_phase(RegionSyncPhase::Idle);
        }
    }

    /// Runs one full sync cycle and returns the feed's cache-expiry hint.
    async fn run_cycle(&self) -> SyncResult<Option<Duration>> {
        self.set_phase(RegionSyncPhase::Fetching);

        let snapshot = self.store.region_snapshot(self.region_id).await?;
        let context = CycleContext {
            region_id: self.region_id,
            fetcher: self.fetcher.clone(),
            coordinator: self.coordinator.clone(),
            notifier: self.notifier.clone(),
            resolver: self.resolver.clone(),
            reconciler: Arc::new(Reconciler::new(self.region_id, snapshot)),
        };

        // The first page decides the cycle's page count.
        let mut expires_hint = None;
        let pages = match self.fetcher.fetch_page(self.region_id, 1).await? {
            PageFetch::Fetched {
                orders,
                pages,
                expires_in,
            } => {
                expires_hint = expires_in;
                context.apply_orders(orders).await?;
                pages
            }
            PageFetch::NotModified {
                known_ids,
                pages,
                expires_in,
            } => {
                expires_hint = expires_in;
                context.reconciler.mark_seen(&known_ids);
                pages.unwrap_or(1)
            }
            PageFetch::NotFound => 0,
            PageFetch::Failed { status } => {
                warn!(status, "abandoned first page after exhausting retries");
                context.reconciler.mark_page_failed();
                0
            }
        };

        if pages > 1 {
            self.fetch_remaining_pages(&context, pages).await;
        }

        self.set_phase(RegionSyncPhase::Reconciling);

        let CycleContext { reconciler, .. } = context;
        let reconciler = Arc::try_unwrap(reconciler).map_err(|_| {
            sync_error!(
                ErrorKind::InvalidState,
                "Reconciler still shared after all page tasks completed"
            )
        })?;
        let (removals, stats) = reconciler.finish();

        self.apply_removals(removals, stats).await?;

        Ok(expires_hint)
    }

    /// Fans pages 2..=pages out onto staggered, permit-bounded tasks.
    async fn fetch_remaining_pages(&self, context: &CycleContext<F, S, P>, pages: u32) {
        let page_permits = Arc::new(Semaphore::new(usize::from(self.config.max_concurrent_pages)));
        let page_stagger = Duration::from_millis(self.config.page_stagger_ms);

        let mut tasks: JoinSet<SyncResult<()>> = JoinSet::new();
        for page in 2..=pages {
            let context = context.clone();
            let page_permits = page_permits.clone();
            let stagger = page_stagger * (page - 2);

            tasks.spawn(async move {
                sleep(stagger).await;
                let _permit = page_permits.acquire().await.map_err(|_| {
                    sync_error!(ErrorKind::InvalidState, "Page permit pool closed")
                })?;

                context.process_page(page).await
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!("abandoned page after fetch error: {err}");
                    context.reconciler.mark_page_failed();
                }
                Err(join_err) => {
                    warn!("abandoned page after task panic: {join_err}");
                    context.reconciler.mark_page_failed();
                }
            }
        }
    }

    /// Applies the cycle's removal pass and publishes the resulting events.
    async fn apply_removals(&self, removals: RemovalPass, stats: CycleStats) -> SyncResult<()> {
        let region_label = self.region_id.to_string();

        match removals {
            RemovalPass::Remove(order_ids) => {
                let removed = self
                    .coordinator
                    .apply_removals(self.region_id, order_ids)
                    .await?;
                let events: Vec<ChangeEvent> =
                    removed.iter().map(ChangeEvent::removal_of).collect();
                self.notifier.publish_all(&events).await;
            }
            RemovalPass::Skipped => {
                warn!("skipping removal pass after abandoned pages");
                counter!(SYNC_CYCLES_DEGRADED_TOTAL, REGION_ID_LABEL => region_label.clone())
                    .increment(1);
            }
        }

        counter!(SYNC_CYCLES_TOTAL, REGION_ID_LABEL => region_label).increment(1);

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            untouched = stats.untouched,
            removed = stats.removed,
            "completed region sync cycle"
        );

        Ok(())
    }

    fn set_phase(&self, phase: RegionSyncPhase) {
        // Receivers may all be gone during teardown.
        let _ = self.phase_tx.send(phase);
    }
}

/// Computes the cooldown until the region's next cycle.
///
/// The feed's cache-expiry hint (or the configured fallback when absent) is
/// discounted by the time the cycle itself took, and never drops below the
/// configured floor.
fn next_cooldown(config: &SyncConfig, expires_in: Option<Duration>, elapsed: Duration) -> Duration {
    expires_in
        .unwrap_or(Duration::from_secs(config.cooldown_fallback_secs))
        .saturating_sub(elapsed)
        .max(Duration::from_secs(config.cooldown_floor_secs))
}

/// Cycle-scoped context shared by the page tasks of one cycle.
#[derive(Debug)]
struct CycleContext<F, S, P> {
    region_id: RegionId,
    fetcher: ConditionalFetcher<F>,
    coordinator: WriteCoordinator<S>,
    notifier: ChangeNotifier<P>,
    resolver: LocationResolver<F, S>,
    reconciler: Arc<Reconciler>,
}

impl<F, S: Clone, P> Clone for CycleContext<F, S, P> {
    fn clone(&self) -> Self {
        Self {
            region_id: self.region_id,
            fetcher: self.fetcher.clone(),
            coordinator: self.coordinator.clone(),
            notifier: self.notifier.clone(),
            resolver: self.resolver.clone(),
            reconciler: self.reconciler.clone(),
        }
    }
}

impl<F, S, P> CycleContext<F, S, P>
where
    F: MarketFeed + Clone + Send + Sync + 'static,
    S: OrderStore + Clone + Send + Sync + 'static,
    P: Publisher + Send + Sync + 'static,
{
    /// Fetches and reconciles one page past the first.
    async fn process_page(&self, page: u32) -> SyncResult<()> {
        match self.fetcher.fetch_page(self.region_id, page).await? {
            PageFetch::Fetched { orders, .. } => self.apply_orders(orders).await?,
            PageFetch::NotModified { known_ids, .. } => self.reconciler.mark_seen(&known_ids),
            // The listing shrank mid-cycle; the page's previous orders will simply
            // not be marked seen and fall to the removal pass.
            PageFetch::NotFound => {}
            PageFetch::Failed { status } => {
                warn!(
                    page,
                    status, "abandoned page after exhausting retries"
                );
                self.reconciler.mark_page_failed();
            }
        }

        Ok(())
    }

    /// Diffs a page of fresh orders, applies the staged batch and publishes its
    /// events.
    async fn apply_orders(&self, orders: Vec<Order>) -> SyncResult<()> {
        let delta = self.reconciler.observe_page(orders);

        for (location_id, system_id) in delta.new_locations {
            self.resolver.spawn_resolve(location_id, system_id);
        }

        if !delta.batch.is_empty() {
            let stats = self.coordinator.apply(self.region_id, delta.batch).await?;

            let region_label = self.region_id.to_string();
            counter!(ORDERS_INSERTED_TOTAL, REGION_ID_LABEL => region_label.clone())
                .increment(stats.inserted);
            counter!(ORDERS_UPDATED_TOTAL, REGION_ID_LABEL => region_label)
                .increment(stats.updated);
        }

        self.notifier.publish_all(&delta.events).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(floor: u64, fallback: u64) -> SyncConfig {
        SyncConfig {
            cooldown_floor_secs: floor,
            cooldown_fallback_secs: fallback,
            ..Default::default()
        }
    }

    #[test]
    fn cooldown_discounts_cycle_duration_from_the_expiry_hint() {
        let cooldown = next_cooldown(
            &config(30, 900),
            Some(Duration::from_secs(300)),
            Duration::from_secs(40),
        );

        assert_eq!(cooldown, Duration::from_secs(260));
    }

    #[test]
    fn cooldown_never_drops_below_the_floor() {
        let cooldown = next_cooldown(
            &config(30, 900),
            Some(Duration::from_secs(10)),
            Duration::from_secs(40),
        );

        assert_eq!(cooldown, Duration::from_secs(30));
    }

    #[test]
    fn missing_expiry_hint_falls_back_to_the_configured_cooldown() {
        let cooldown = next_cooldown(&config(30, 900), None, Duration::from_secs(100));

        assert_eq!(cooldown, Duration::from_secs(800));
    }
}
