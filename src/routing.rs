//! A weight-expanded routing table over server groups.
//!
//! Every group occupies as many consecutive slots as its weight, so choosing a slot uniformly at
//! random (or by `hash % len`) selects a node with probability `weight / total_weight`. Tables
//! are built once per topology change and never mutated; locators publish a new table and
//! readers keep whichever snapshot they loaded for the duration of one lookup.
use fxhash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

use crate::group::{segment, ServerGroup};
use crate::session::Session;

/// HostIndex entry: a group and the first slot it occupies in the table.
pub struct HostEntry<S: ?Sized> {
    /// The group owning the host.
    pub group: Arc<ServerGroup<S>>,
    /// Index of the first slot the group occupies.
    pub slot: usize,
}

/// Immutable snapshot of the topology: weight-expanded slots plus a host index.
pub struct RoutingTable<S: ?Sized> {
    slots: Vec<Arc<ServerGroup<S>>>,
    hosts: FxHashMap<Arc<str>, HostEntry<S>>,
}

impl<S: Session + ?Sized> RoutingTable<S> {
    /// A table with no slots. Every lookup against it is unavailable.
    pub fn empty() -> Self {
        RoutingTable {
            slots: Vec::new(),
            hosts: FxHashMap::default(),
        }
    }

    /// Builds a table from the current sessions.
    ///
    /// When two groups report the same host identity, the first one owns the host index entry.
    pub fn build(sessions: &[Arc<S>]) -> Self {
        let groups = segment(sessions);
        let total = groups.iter().map(|g| g.weight()).sum();

        let mut slots = Vec::with_capacity(total);
        let mut hosts = FxHashMap::default();

        for group in groups {
            let group = Arc::new(group);
            hosts
                .entry(Arc::clone(group.host()))
                .or_insert_with(|| HostEntry {
                    group: Arc::clone(&group),
                    slot: slots.len(),
                });
            for _ in 0..group.weight() {
                slots.push(Arc::clone(&group));
            }
        }

        RoutingTable { slots, hosts }
    }

    /// Number of slots, i.e. the sum of all group weights.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of distinct host identities in the table.
    pub fn distinct_hosts(&self) -> usize {
        self.hosts.len()
    }

    /// The group at `index`, if in range.
    pub fn slot(&self, index: usize) -> Option<&Arc<ServerGroup<S>>> {
        self.slots.get(index)
    }

    /// All slots in table order.
    pub fn slots(&self) -> &[Arc<ServerGroup<S>>] {
        &self.slots
    }

    /// Resolves a host identity through the host index.
    pub fn host(&self, host: &str) -> Option<&HostEntry<S>> {
        self.hosts.get(host)
    }

    /// Every host identity in the host index, in no particular order.
    pub fn hosts(&self) -> impl Iterator<Item = &Arc<str>> {
        self.hosts.keys()
    }

    /// Maps a key hash onto a slot, or `None` for an empty table.
    pub fn bucket_for(&self, hash: u64) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        Some((hash % self.slots.len() as u64) as usize)
    }

    /// Slot indices visited when failing over from `start`: ascending, wrapping around, each
    /// slot exactly once.
    pub fn probe_order(&self, start: usize) -> impl Iterator<Item = usize> {
        let len = self.slots.len();
        (0..len).map(move |i| (start + i) % len)
    }

    /// Picks a random session from the group at `start`.
    ///
    /// With `failure_mode` set, the session is returned even if it is closed. Otherwise the
    /// following slots are tried in [`probe_order`](RoutingTable::probe_order) until an open
    /// session turns up; `None` after a full cycle.
    pub fn select_with_failover(&self, start: usize, failure_mode: bool) -> Option<Arc<S>> {
        if start >= self.slots.len() {
            return None;
        }

        if failure_mode {
            return self.slots[start].random_session().cloned();
        }

        for index in self.probe_order(start) {
            match self.slots[index].random_session() {
                Some(session) if !session.is_closed() => return Some(Arc::clone(session)),
                _ => trace!(slot = index, "session closed, probing next slot"),
            }
        }

        None
    }
}
