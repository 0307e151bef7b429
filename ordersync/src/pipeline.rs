//! The top-level synchronization pipeline.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::cache::CooldownCache;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncResult};
use crate::feed::client::MarketFeed;
use crate::feed::fetcher::ConditionalFetcher;
use crate::feed::rate_gate::{RateGate, RateSchedule};
use crate::notify::{ChangeNotifier, Publisher};
use crate::resolve::LocationResolver;
use crate::store::orders::OrderStore;
use crate::sync_error;
use crate::workers::pool::RegionSyncWorkerPool;
use crate::workers::region_sync::RegionSyncWorker;
use crate::write::WriteCoordinator;

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started { pool: RegionSyncWorkerPool },
}

/// Pipeline mirroring every region of the market feed into the order store.
///
/// Owns the shared resources the region workers coordinate through: the rate
/// gate, the write coordinator, the location resolver, and the shutdown channel.
/// One worker is spawned per region discovered at start time.
#[derive(Debug)]
pub struct SyncPipeline<F, S, C, P> {
    config: Arc<SyncConfig>,
    feed: F,
    store: S,
    cooldowns: C,
    notifier: ChangeNotifier<P>,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<F, S, C, P> SyncPipeline<F, S, C, P>
where
    F: MarketFeed + Clone + Send + Sync + 'static,
    S: OrderStore + Clone + Send + Sync + 'static,
    C: CooldownCache + Clone + Send + Sync + 'static,
    P: Publisher + Send + Sync + 'static,
{
    pub fn new(config: SyncConfig, feed: F, store: S, cooldowns: C, publisher: P) -> Self {
        // The receiver is never stored; workers subscribe through the transmitter.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            feed,
            store,
            cooldowns,
            notifier: ChangeNotifier::new(publisher),
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Discovers the feed's regions and launches one sync worker per region.
    pub async fn start(&mut self) -> SyncResult<()> {
        if let PipelineState::Started { .. } = self.state {
            return Err(sync_error!(
                ErrorKind::InvalidState,
                "Pipeline already started"
            ));
        }

        self.config.validate()?;

        let gate = Arc::new(RateGate::new(RateSchedule::from_config(&self.config.rate)));
        let fetcher = ConditionalFetcher::new(
            self.feed.clone(),
            gate.clone(),
            self.config.page_fetch_attempts,
            Duration::from_millis(self.config.page_retry_backoff_ms),
        );
        let coordinator = WriteCoordinator::new(self.store.clone());
        let resolver = LocationResolver::new(self.feed.clone(), self.store.clone(), gate.clone());
        let sync_permits = Arc::new(Semaphore::new(usize::from(
            self.config.max_concurrent_regions,
        )));

        gate.acquire().await;
        let mut regions = self.feed.fetch_regions().await?;
        info!(regions = regions.len(), "starting region sync pipeline");

        // Shuffling spreads which regions pay the launch stagger, so no region is
        // structurally always the last to sync after a restart.
        regions.shuffle(&mut rand::rng());

        let launch_stagger = Duration::from_millis(self.config.launch_stagger_ms);
        let pool = RegionSyncWorkerPool::new();

        {
            let mut pool_inner = pool.lock().await;
            for (index, region_id) in regions.into_iter().enumerate() {
                let worker = RegionSyncWorker::new(
                    region_id,
                    self.config.clone(),
                    self.store.clone(),
                    fetcher.clone(),
                    coordinator.clone(),
                    self.notifier.clone(),
                    resolver.clone(),
                    self.cooldowns.clone(),
                    sync_permits.clone(),
                    self.shutdown_tx.subscribe(),
                    launch_stagger * index as u32,
                );

                let phase = worker.phase_watch();
                pool_inner.spawn(region_id, phase, worker.run());
            }
        }

        self.state = PipelineState::Started { pool };

        Ok(())
    }

    /// Waits for every region worker to complete.
    ///
    /// Workers only complete on shutdown or on an unrecoverable error, so this
    /// normally blocks for the process lifetime.
    pub async fn wait(self) -> SyncResult<()> {
        let PipelineState::Started { pool } = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        info!("waiting for region sync workers to complete");

        pool.wait_all().await
    }

    /// Signals all workers to shut down without waiting for them.
    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the pipeline: {err}");
            return;
        }

        info!("shutdown signal successfully sent to all workers");
    }

    pub async fn shutdown_and_wait(self) -> SyncResult<()> {
        self.shutdown();
        self.wait().await
    }
}
