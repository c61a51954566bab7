use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::trace;

use super::{Router, SessionLocator};
use crate::config::LocatorConfig;
use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, KeyHasher};
use crate::routing::{HostEntry, RoutingTable};
use crate::session::Session;

/// Spreads every key over up to `copy_num` distinct hosts, adding one host per write.
///
/// The first write of a key is placed by hash routing. Each following write picks a random host
/// that does not yet hold the key, until the set reaches `copy_num` hosts (or the cluster has
/// fewer distinct hosts than that); after that writes and reads go to a random member. Reading a
/// key that was never written is an error, since there is nowhere to read it from.
///
/// Replica sets are kept for the lifetime of the locator. Updates to one key's set are serialized,
/// so concurrent writers can neither exceed the bound nor add the same host twice.
pub struct ReplicaLocator<S: ?Sized> {
    router: Router<S>,
    copy_num: usize,
    replicas: DashMap<String, Vec<Arc<str>>>,
}

impl<S: Session + ?Sized> ReplicaLocator<S> {
    /// A locator with replication factor `copy_num`, using [`HashAlgorithm::Native`].
    pub fn new(copy_num: usize) -> Self {
        Self::with_hasher(HashAlgorithm::Native, copy_num)
    }

    /// A locator using a custom hasher.
    pub fn with_hasher<H: KeyHasher + 'static>(hasher: H, copy_num: usize) -> Self {
        ReplicaLocator {
            router: Router::new(Box::new(hasher)),
            copy_num,
            replicas: DashMap::new(),
        }
    }

    /// Builds a locator from configuration.
    pub fn from_config(config: &LocatorConfig) -> Result<Self> {
        config.validate()?;

        let locator = Self::with_hasher(config.hash_algorithm, config.copy_num);
        locator.router.set_failure_mode(config.failure_mode);
        Ok(locator)
    }

    /// The replication factor.
    pub fn copy_num(&self) -> usize {
        self.copy_num
    }

    /// Hosts currently holding `key`, in the order they were added.
    pub fn replicas(&self, key: &str) -> Option<Vec<Arc<str>>> {
        self.replicas.get(key).map(|set| set.value().clone())
    }

    fn read(&self, table: &RoutingTable<S>, key: &str) -> Result<Arc<S>> {
        let set = self
            .replicas
            .get(key)
            .ok_or_else(|| Error::NotReplicated(key.to_string()))?;
        member_session(table, set.value())
    }

    fn write(&self, table: &RoutingTable<S>, key: &str) -> Result<Arc<S>> {
        match self.replicas.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let session = self.router.hash_select(table, key)?;
                trace!(key, host = %session.remote_host(), "first replica placed by hash");
                vacant.insert(vec![Arc::from(session.remote_host())]);
                Ok(session)
            }
            Entry::Occupied(mut occupied) => {
                let set = occupied.get_mut();
                if set.len() < self.copy_num && self.copy_num <= table.distinct_hosts() {
                    if let Some((host, session)) = new_replica(table, set) {
                        trace!(key, host = %host, replicas = set.len() + 1, "replica added");
                        set.push(host);
                        return Ok(session);
                    }
                }
                member_session(table, set)
            }
        }
    }
}

/// Draws a host that is not yet in `set`, weighted by slot count.
fn new_replica<S: Session + ?Sized>(
    table: &RoutingTable<S>,
    set: &[Arc<str>],
) -> Option<(Arc<str>, Arc<S>)> {
    let candidates: Vec<&Arc<str>> = table
        .slots()
        .iter()
        .map(|group| group.host())
        .filter(|host| !set.contains(*host))
        .collect();

    let host = candidates.choose(&mut rand::thread_rng())?;
    let entry = table.host(host)?;
    let session = entry.group.random_session()?;
    Some((Arc::clone(host), Arc::clone(session)))
}

/// Random session of a random member host that is still part of the topology.
fn member_session<S: Session + ?Sized>(table: &RoutingTable<S>, set: &[Arc<str>]) -> Result<Arc<S>> {
    let members: Vec<&HostEntry<S>> = set.iter().filter_map(|host| table.host(host)).collect();

    members
        .choose(&mut rand::thread_rng())
        .and_then(|entry| entry.group.random_session())
        .cloned()
        .ok_or(Error::Unavailable)
}

impl<S: Session + ?Sized> SessionLocator<S> for ReplicaLocator<S> {
    fn session_by_key(&self, key: &str, is_write: bool) -> Result<Arc<S>> {
        let table = self.router.load();
        if table.is_empty() {
            return Err(Error::Unavailable);
        }

        if is_write {
            self.write(&table, key)
        } else {
            self.read(&table, key)
        }
    }

    fn update_sessions(&self, sessions: &[Arc<S>]) {
        self.router.update(sessions);
    }

    fn set_failure_mode(&self, enabled: bool) {
        self.router.set_failure_mode(enabled);
    }

    fn failure_mode(&self) -> bool {
        self.router.failure_mode()
    }

    fn find_session_num_by_key(&self, key: &str) -> Option<usize> {
        let table = self.router.load();
        self.router.bucket(&table, key)
    }

    fn last_index(&self) -> usize {
        self.router.last_index()
    }

    fn stop(&self) {}
}
