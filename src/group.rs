//! Grouping of sessions by the node they are connected to.
use fxhash::FxHashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::session::Session;

/// The sessions connected to one physical node.
///
/// A group is never empty. Its weight is taken from the first session, since every connection to
/// a node reports the same capacity.
pub struct ServerGroup<S: ?Sized> {
    addr: SocketAddr,
    host: Arc<str>,
    weight: usize,
    sessions: Vec<Arc<S>>,
}

impl<S: Session + ?Sized> ServerGroup<S> {
    fn new(first: Arc<S>) -> Self {
        ServerGroup {
            addr: first.remote_addr(),
            host: Arc::from(first.remote_host()),
            weight: first.weight().max(1),
            sessions: vec![first],
        }
    }

    /// Address shared by every session in the group.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host identity of the node.
    pub fn host(&self) -> &Arc<str> {
        &self.host
    }

    /// Number of routing table slots the group occupies. Always at least 1.
    pub fn weight(&self) -> usize {
        self.weight
    }

    /// Sessions of the group, in the order they were supplied.
    pub fn sessions(&self) -> &[Arc<S>] {
        &self.sessions
    }

    /// Number of sessions in the group.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Always false for groups built by [`segment`].
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Picks a session uniformly at random, regardless of whether it is open.
    pub fn random_session(&self) -> Option<&Arc<S>> {
        use rand::seq::SliceRandom;
        self.sessions.choose(&mut rand::thread_rng())
    }
}

/// Partitions sessions into groups by remote address.
///
/// Sessions do not need to be adjacent to land in the same group. Groups are returned in the
/// order their address first appears, and sessions keep their relative order within a group.
pub fn segment<S: Session + ?Sized>(sessions: &[Arc<S>]) -> Vec<ServerGroup<S>> {
    let mut index: FxHashMap<SocketAddr, usize> = FxHashMap::default();
    let mut groups: Vec<ServerGroup<S>> = Vec::new();

    for session in sessions {
        let addr = session.remote_addr();
        match index.get(&addr) {
            Some(&i) => groups[i].sessions.push(Arc::clone(session)),
            None => {
                index.insert(addr, groups.len());
                groups.push(ServerGroup::new(Arc::clone(session)));
            }
        }
    }

    groups
}
