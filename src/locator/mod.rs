//! Session locators.
//!
//! A locator maps a key onto one of the sessions it was last given through
//! [`SessionLocator::update_sessions`]. Two strategies are provided:
//!
//! - [`HashLocator`]: `hash(key) % slots` over a weight-expanded routing table, with linear
//!   failover past closed sessions and optional controller-supplied overrides.
//! - [`ReplicaLocator`]: grows a bounded set of distinct hosts per key, one host per write, and
//!   serves reads from any member of that set.
use arc_swap::{ArcSwap, Guard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::{LocatorConfig, LocatorKind};
use crate::error::{Error, Result};
use crate::hash::KeyHasher;
use crate::routing::RoutingTable;
use crate::session::Session;

mod hash;
mod replica;

pub use self::hash::HashLocator;
pub use self::replica::ReplicaLocator;

/// Capability shared by every locator.
///
/// All methods take `&self`: lookups run concurrently from request tasks while topology updates
/// arrive from whichever component watches the cluster.
pub trait SessionLocator<S: Session + ?Sized>: Send + Sync {
    /// Selects the session that should serve `key`.
    ///
    /// Returns [`Error::Unavailable`] when no session can be selected. Replica locators also
    /// return [`Error::NotReplicated`] for reads of keys that were never written.
    fn session_by_key(&self, key: &str, is_write: bool) -> Result<Arc<S>>;

    /// Replaces the routing table with one built from `sessions`.
    fn update_sessions(&self, sessions: &[Arc<S>]);

    /// With failure mode on, closed sessions are returned as-is instead of failing over.
    fn set_failure_mode(&self, enabled: bool);

    /// Whether failure mode is on.
    fn failure_mode(&self) -> bool;

    /// The slot `key` hashes to before any override or failover, or `None` for an empty table.
    fn find_session_num_by_key(&self, key: &str) -> Option<usize>;

    /// The slot resolved by the most recent lookup.
    fn last_index(&self) -> usize;

    /// Releases background resources.
    fn stop(&self);
}

/// State common to both locators: the published table, the hash and the failover policy.
pub(crate) struct Router<S: ?Sized> {
    hasher: Box<dyn KeyHasher>,
    table: ArcSwap<RoutingTable<S>>,
    failure_mode: AtomicBool,
    last_index: AtomicUsize,
}

impl<S: Session + ?Sized> Router<S> {
    pub(crate) fn new(hasher: Box<dyn KeyHasher>) -> Self {
        Router {
            hasher,
            table: ArcSwap::from_pointee(RoutingTable::empty()),
            failure_mode: AtomicBool::new(false),
            last_index: AtomicUsize::new(0),
        }
    }

    /// Snapshot of the current table, valid for one lookup.
    pub(crate) fn load(&self) -> Guard<Arc<RoutingTable<S>>> {
        self.table.load()
    }

    pub(crate) fn update(&self, sessions: &[Arc<S>]) {
        let table = RoutingTable::build(sessions);
        debug!(
            sessions = sessions.len(),
            hosts = table.distinct_hosts(),
            slots = table.len(),
            "routing table updated"
        );
        self.table.store(Arc::new(table));
    }

    pub(crate) fn bucket(&self, table: &RoutingTable<S>, key: &str) -> Option<usize> {
        table.bucket_for(self.hasher.hash(key))
    }

    /// Hash routing with failover, recording the hashed slot as the last index.
    pub(crate) fn hash_select(&self, table: &RoutingTable<S>, key: &str) -> Result<Arc<S>> {
        let start = self.bucket(table, key).ok_or(Error::Unavailable)?;
        self.record_index(start);
        table
            .select_with_failover(start, self.failure_mode())
            .ok_or(Error::Unavailable)
    }

    pub(crate) fn record_index(&self, index: usize) {
        self.last_index.store(index, Ordering::Relaxed);
    }

    pub(crate) fn last_index(&self) -> usize {
        self.last_index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_failure_mode(&self, enabled: bool) {
        self.failure_mode.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn failure_mode(&self) -> bool {
        self.failure_mode.load(Ordering::Relaxed)
    }
}

/// Builds the locator described by `config`.
///
/// When override routing is enabled the controller poll loop is spawned, which requires a tokio
/// runtime.
pub fn build_locator<S>(config: &LocatorConfig) -> Result<Box<dyn SessionLocator<S>>>
where
    S: Session + ?Sized + 'static,
{
    config.validate()?;

    match config.kind {
        LocatorKind::Hash => Ok(Box::new(HashLocator::from_config(config)?)),
        LocatorKind::Replica => Ok(Box::new(ReplicaLocator::from_config(config)?)),
    }
}
