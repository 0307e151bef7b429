//! Pool owning all spawned region sync workers.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::error::{ErrorKind, SyncResult};
use crate::sync_error;
use crate::types::RegionId;
use crate::workers::region_sync::{RegionSyncPhase, RegionSyncWorkerHandle};

/// Internal state for [`RegionSyncWorkerPool`].
#[derive(Debug)]
pub struct RegionSyncWorkerPoolInner {
    /// Currently active workers indexed by region id.
    active: HashMap<RegionId, RegionSyncWorkerHandle>,
    /// Owns all spawned worker tasks.
    join_set: JoinSet<(RegionId, SyncResult<()>)>,
}

impl RegionSyncWorkerPoolInner {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Spawns a worker future and inserts its handle into the pool.
    ///
    /// A region with a still-running worker is left alone; each region must have at
    /// most one worker at a time.
    pub fn spawn<Fut>(
        &mut self,
        region_id: RegionId,
        phase: watch::Receiver<RegionSyncPhase>,
        future: Fut,
    ) where
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        match self.active.entry(region_id) {
            Entry::Vacant(entry) => {
                let abort_handle = self.join_set.spawn(async move {
                    let result = future.await;
                    (region_id, result)
                });

                entry.insert(RegionSyncWorkerHandle::new(phase, abort_handle));

                debug!(region_id, "spawned region sync worker in pool");
            }
            Entry::Occupied(entry) => {
                if entry.get().is_finished() {
                    let abort_handle = self.join_set.spawn(async move {
                        let result = future.await;
                        (region_id, result)
                    });

                    entry.remove();
                    self.active
                        .insert(region_id, RegionSyncWorkerHandle::new(phase, abort_handle));

                    debug!(region_id, "replaced finished region sync worker in pool");
                } else {
                    warn!(region_id, "region sync worker already running");
                }
            }
        }
    }

    /// Returns the current phase of a region's worker, if one is running.
    pub fn worker_phase(&self, region_id: RegionId) -> Option<RegionSyncPhase> {
        let handle = self.active.get(&region_id)?;
        if handle.is_finished() {
            return None;
        }

        Some(handle.phase())
    }

    /// Number of workers currently held by the pool.
    pub fn worker_count(&self) -> usize {
        self.active.len()
    }
}

/// Pool coordinating all region sync workers of one pipeline.
///
/// The pool owns the worker tasks; dropping it aborts whatever is still running.
#[derive(Debug, Clone)]
pub struct RegionSyncWorkerPool {
    inner: Arc<Mutex<RegionSyncWorkerPoolInner>>,
}

impl RegionSyncWorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegionSyncWorkerPoolInner::new())),
        }
    }

    /// Waits for every worker in the pool to complete.
    ///
    /// Worker errors and panics are collected and returned together once the pool
    /// has drained; one failing region does not mask the others.
    pub async fn wait_all(&self) -> SyncResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut inner = self.inner.lock().await;
                inner.join_set.join_next().await
            };

            let Some(result) = result else {
                break;
            };

            match result {
                Ok((region_id, worker_result)) => {
                    let mut inner = self.inner.lock().await;
                    inner.active.remove(&region_id);

                    if let Err(err) = worker_result {
                        error!(region_id, "region sync worker completed with error: {err}");
                        errors.push(err);
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("region sync worker task was cancelled");
                    } else {
                        errors.push(sync_error!(
                            ErrorKind::RegionSyncWorkerPanic,
                            "Region sync worker panicked",
                            source: join_err
                        ));
                    }
                }
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.active.clear();
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

impl Default for RegionSyncWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for RegionSyncWorkerPool {
    type Target = Mutex<RegionSyncWorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;

    fn idle_phase() -> watch::Receiver<RegionSyncPhase> {
        watch::channel(RegionSyncPhase::Idle).1
    }

    #[tokio::test]
    async fn wait_all_collects_worker_errors() {
        let pool = RegionSyncWorkerPool::new();

        {
            let mut inner = pool.lock().await;
            inner.spawn(1, idle_phase(), async { Ok(()) });
            inner.spawn(2, idle_phase(), async {
                bail!(ErrorKind::StoreWriteFailed, "Write failed")
            });
        }

        let err = pool.wait_all().await.unwrap_err();
        assert!(err.kinds().contains(&ErrorKind::StoreWriteFailed));
    }

    #[tokio::test]
    async fn duplicate_regions_keep_the_running_worker() {
        let pool = RegionSyncWorkerPool::new();

        {
            let mut inner = pool.lock().await;
            inner.spawn(1, idle_phase(), async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(())
            });
            inner.spawn(1, idle_phase(), async { Ok(()) });
            assert_eq!(inner.worker_count(), 1);
        }

        pool.wait_all().await.unwrap();
    }

    #[tokio::test]
    async fn panics_surface_as_worker_panic_errors() {
        let pool = RegionSyncWorkerPool::new();

        {
            let mut inner = pool.lock().await;
            inner.spawn(1, idle_phase(), async { panic!("worker blew up") });
        }

        let err = pool.wait_all().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegionSyncWorkerPanic);
    }
}
