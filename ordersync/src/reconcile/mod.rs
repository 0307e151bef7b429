//! Cycle-scoped diffing of feed pages against the stored region state.
//!
//! A [`Reconciler`] lives for exactly one sync cycle of one region. It starts from
//! a snapshot of everything the store knows about the region, consumes pages as
//! they arrive in any order, and at the end names the orders that vanished from
//! the feed. All store writes it stages are deltas; untouched orders produce no
//! traffic at all.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::store::orders::{OrderUpdate, OrderWriteBatch};
use crate::types::{ChangeEvent, LocationId, Order, OrderDigest, OrderId, RegionId, SystemId};

/// Staged effects of one observed page.
#[derive(Debug, Default)]
pub struct PageDelta {
    /// Inserts and field updates to apply to the store.
    pub batch: OrderWriteBatch,
    /// Upsert events to publish once the batch is applied.
    pub events: Vec<ChangeEvent>,
    /// Locations seen for the first time this cycle, to hand to the resolver.
    pub new_locations: Vec<(LocationId, SystemId)>,
}

/// What to do about orders that were never seen this cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum RemovalPass {
    /// Every page was accounted for; these orders are gone from the feed.
    Remove(Vec<OrderId>),
    /// At least one page was abandoned, so absence proves nothing. No order is
    /// removed this cycle; the next cycle gets a fresh chance.
    Skipped,
}

/// Summary counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub inserted: u64,
    pub updated: u64,
    pub untouched: u64,
    pub removed: u64,
}

#[derive(Debug)]
struct State {
    snapshot: HashMap<OrderId, OrderDigest>,
    seen: HashSet<OrderId>,
    reported_locations: HashSet<LocationId>,
    page_abandoned: bool,
    inserted: u64,
    updated: u64,
    untouched: u64,
}

/// Diff engine for one region sync cycle.
///
/// Pages may be observed concurrently and in any order; internal state is guarded
/// by a mutex held only for the duration of a page diff. Observing the same page
/// twice is harmless: the snapshot is updated as deltas are staged, so a repeat
/// observation stages nothing.
#[derive(Debug)]
pub struct Reconciler {
    region_id: RegionId,
    state: Mutex<State>,
}

impl Reconciler {
    /// Starts a cycle from the store's current view of the region.
    pub fn new(region_id: RegionId, snapshot: HashMap<OrderId, OrderDigest>) -> Self {
        Self {
            region_id,
            state: Mutex::new(State {
                snapshot,
                seen: HashSet::new(),
                reported_locations: HashSet::new(),
                page_abandoned: false,
                inserted: 0,
                updated: 0,
                untouched: 0,
            }),
        }
    }

    pub fn region_id(&self) -> RegionId {
        self.region_id
    }

    /// Diffs one page of fresh orders against the snapshot.
    pub fn observe_page(&self, orders: Vec<Order>) -> PageDelta {
        let mut state = self.state.lock().expect("reconciler lock poisoned");
        let mut delta = PageDelta::default();

        for order in orders {
            let newly_seen = state.seen.insert(order.order_id);
            let digest = OrderDigest::from(&order);

            match state.snapshot.get(&order.order_id).copied() {
                None => {
                    state.snapshot.insert(order.order_id, digest);
                    state.inserted += 1;
                    if state.reported_locations.insert(order.location_id) {
                        delta.new_locations.push((order.location_id, order.system_id));
                    }
                    delta.events.push(ChangeEvent::Upsert(order.clone()));
                    delta.batch.upserts.push(order);
                }
                Some(known) if known != digest => {
                    state.snapshot.insert(order.order_id, digest);
                    state.updated += 1;
                    delta.batch.updates.push(OrderUpdate {
                        order_id: order.order_id,
                        type_id: order.type_id,
                        price: (known.price != order.price).then_some(order.price),
                        volume_remain: (known.volume_remain != order.volume_remain)
                            .then_some(order.volume_remain),
                    });
                    delta.events.push(ChangeEvent::Upsert(order));
                }
                Some(_) => {
                    if newly_seen {
                        state.untouched += 1;
                    }
                }
            }
        }

        delta
    }

    /// Marks orders as still present without diffing them.
    ///
    /// Used for not-modified pages, whose content is known to be byte-identical to
    /// the last observation.
    pub fn mark_seen(&self, order_ids: &[OrderId]) {
        let mut state = self.state.lock().expect("reconciler lock poisoned");
        for order_id in order_ids {
            if state.seen.insert(*order_id) && state.snapshot.contains_key(order_id) {
                state.untouched += 1;
            }
        }
    }

    /// Records that a page could not be fetched this cycle.
    ///
    /// Once any page is abandoned the cycle loses the right to interpret absence as
    /// deletion.
    pub fn mark_page_failed(&self) {
        let mut state = self.state.lock().expect("reconciler lock poisoned");
        state.page_abandoned = true;
    }

    /// Ends the cycle, naming the orders that vanished from the feed.
    pub fn finish(self) -> (RemovalPass, CycleStats) {
        let state = self.state.into_inner().expect("reconciler lock poisoned");

        let mut stats = CycleStats {
            inserted: state.inserted,
            updated: state.updated,
            untouched: state.untouched,
            removed: 0,
        };

        if state.page_abandoned {
            return (RemovalPass::Skipped, stats);
        }

        let mut vanished: Vec<OrderId> = state
            .snapshot
            .keys()
            .filter(|order_id| !state.seen.contains(order_id))
            .copied()
            .collect();
        vanished.sort_unstable();

        stats.removed = vanished.len() as u64;
        (RemovalPass::Remove(vanished), stats)
    }
}
