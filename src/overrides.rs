//! Controller-supplied key placement hints.
use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::Error;

/// How a host is chosen from a key's override list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverridePolicy {
    /// Uniformly random host on every lookup.
    #[default]
    Random,
    /// Rotate through the list in order, one step per lookup of the same key.
    RoundRobin,
}

impl FromStr for OverridePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round-robin" | "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(Error::Config(format!("unknown override policy `{other}`"))),
        }
    }
}

/// Key → candidate hosts, written by the override fetcher and read by the hash locator.
///
/// Entries are only ever overwritten; a key that disappears from the controller's mapping keeps
/// its last known hosts.
#[derive(Debug, Default)]
pub struct OverrideStore {
    entries: DashMap<String, Arc<[Arc<str>]>>,
}

impl OverrideStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the host list for `key`. Empty lists are ignored.
    pub fn insert<I, H>(&self, key: impl Into<String>, hosts: I)
    where
        I: IntoIterator<Item = H>,
        H: Into<Arc<str>>,
    {
        let hosts: Arc<[Arc<str>]> = hosts.into_iter().map(Into::into).collect();
        if hosts.is_empty() {
            return;
        }
        self.entries.insert(key.into(), hosts);
    }

    /// Current host list for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<[Arc<str>]>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Whether `key` has an entry.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has an entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-key position into the override list, for [`OverridePolicy::RoundRobin`].
#[derive(Debug, Default)]
pub struct AccessCursor {
    positions: DashMap<String, usize>,
}

impl AccessCursor {
    /// A cursor with no positions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the cursor for `key` over a list of `len` hosts and returns the new position.
    ///
    /// The first access yields 0. The update holds the key's shard lock, so concurrent callers
    /// each observe a distinct step.
    pub fn advance(&self, key: &str, len: usize) -> usize {
        if len == 0 {
            return 0;
        }

        if let Some(mut pos) = self.positions.get_mut(key) {
            *pos = (*pos + 1) % len;
            return *pos;
        }

        *self
            .positions
            .entry(key.to_string())
            .and_modify(|pos| *pos = (*pos + 1) % len)
            .or_insert(0)
    }
}

/// Picks the override host for one lookup according to `policy`.
pub(crate) fn pick_host(
    policy: OverridePolicy,
    cursor: &AccessCursor,
    key: &str,
    hosts: &[Arc<str>],
) -> Option<Arc<str>> {
    if hosts.is_empty() {
        return None;
    }

    let index = match policy {
        OverridePolicy::Random => rand::thread_rng().gen_range(0..hosts.len()),
        OverridePolicy::RoundRobin => cursor.advance(key, hosts.len()),
    };

    hosts.get(index).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_overwrites_entries() {
        let store = OverrideStore::new();
        store.insert("key1", ["hostA", "hostB"]);
        store.insert("key1", ["hostC"]);

        let hosts = store.get("key1").unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(&*hosts[0], "hostC");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_ignores_empty_host_lists() {
        let store = OverrideStore::new();
        store.insert("key1", Vec::<String>::new());
        assert!(!store.contains_key("key1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_cursor_cycles_from_zero() {
        let cursor = AccessCursor::new();
        let positions: Vec<usize> = (0..5).map(|_| cursor.advance("key1", 2)).collect();
        assert_eq!(positions, vec![0, 1, 0, 1, 0]);
        assert_eq!(cursor.advance("key2", 3), 0);
    }

    #[test]
    fn test_cursor_adapts_to_shrunk_lists() {
        let cursor = AccessCursor::new();
        cursor.advance("key1", 3);
        cursor.advance("key1", 3);
        cursor.advance("key1", 3);
        assert_eq!(cursor.advance("key1", 2), 1);
    }

    #[test]
    fn test_pick_host_round_robin() {
        let cursor = AccessCursor::new();
        let hosts: Vec<Arc<str>> = vec!["hostA".into(), "hostB".into()];
        let picks: Vec<String> = (0..3)
            .map(|_| {
                pick_host(OverridePolicy::RoundRobin, &cursor, "key1", &hosts)
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(picks, vec!["hostA", "hostB", "hostA"]);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("random".parse::<OverridePolicy>().unwrap(), OverridePolicy::Random);
        assert_eq!(
            "round-robin".parse::<OverridePolicy>().unwrap(),
            OverridePolicy::RoundRobin
        );
        assert!("sticky".parse::<OverridePolicy>().is_err());
    }
}
