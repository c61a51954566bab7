use std::sync::Arc;
use tracing::trace;

use super::{Router, SessionLocator};
use crate::config::LocatorConfig;
use crate::error::{Error, Result};
use crate::fetcher::OverrideFetcher;
use crate::hash::{HashAlgorithm, KeyHasher};
use crate::overrides::{pick_host, AccessCursor, OverridePolicy, OverrideStore};
use crate::routing::RoutingTable;
use crate::session::Session;

struct Overrides {
    store: Arc<OverrideStore>,
    policy: OverridePolicy,
    cursor: AccessCursor,
    fetcher: Option<OverrideFetcher>,
}

/// Weighted `hash(key) % slots` routing with linear failover.
///
/// When overrides are attached, a key with an entry in the [`OverrideStore`] is always served
/// from one of its listed hosts; hash routing is only used for keys without an entry, or when
/// the chosen host is not part of the current topology.
pub struct HashLocator<S: ?Sized> {
    router: Router<S>,
    overrides: Option<Overrides>,
}

impl<S: Session + ?Sized> HashLocator<S> {
    /// A locator using [`HashAlgorithm::Native`] and no overrides.
    pub fn new() -> Self {
        Self::with_hasher(HashAlgorithm::Native)
    }

    /// A locator using a custom hasher and no overrides.
    pub fn with_hasher<H: KeyHasher + 'static>(hasher: H) -> Self {
        HashLocator {
            router: Router::new(Box::new(hasher)),
            overrides: None,
        }
    }

    /// Consults `store` before hash routing.
    ///
    /// The store is filled by whoever owns it, typically an [`OverrideFetcher`].
    pub fn with_overrides(mut self, store: Arc<OverrideStore>, policy: OverridePolicy) -> Self {
        self.overrides = Some(Overrides {
            store,
            policy,
            cursor: AccessCursor::new(),
            fetcher: None,
        });
        self
    }

    /// Builds a locator from configuration, spawning the controller poll loop when override
    /// routing is enabled.
    pub fn from_config(config: &LocatorConfig) -> Result<Self> {
        config.validate()?;

        let mut locator = Self::with_hasher(config.hash_algorithm);
        locator.router.set_failure_mode(config.failure_mode);

        if let (true, Some(controller)) = (config.override_enabled, config.controller.as_ref()) {
            let store = Arc::new(OverrideStore::new());
            let fetcher = OverrideFetcher::spawn(controller.clone(), Arc::clone(&store))?;
            locator.overrides = Some(Overrides {
                store,
                policy: config.override_policy,
                cursor: AccessCursor::new(),
                fetcher: Some(fetcher),
            });
        }

        Ok(locator)
    }

    /// The attached override store, if any.
    pub fn override_store(&self) -> Option<&Arc<OverrideStore>> {
        self.overrides.as_ref().map(|o| &o.store)
    }

    /// The controller poll loop, when built from a configuration with a controller.
    pub fn fetcher(&self) -> Option<&OverrideFetcher> {
        self.overrides.as_ref().and_then(|o| o.fetcher.as_ref())
    }

    fn override_session(&self, table: &RoutingTable<S>, key: &str) -> Option<Arc<S>> {
        let overrides = self.overrides.as_ref()?;
        let hosts = overrides.store.get(key)?;
        let host = pick_host(overrides.policy, &overrides.cursor, key, &hosts)?;

        let Some(entry) = table.host(&host) else {
            trace!(key, host = %host, "override host not in topology, using hash routing");
            return None;
        };

        let session = entry.group.random_session()?;
        self.router.record_index(entry.slot);
        trace!(key, host = %host, slot = entry.slot, "routed by override");
        Some(Arc::clone(session))
    }
}

impl<S: Session + ?Sized> Default for HashLocator<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Session + ?Sized> SessionLocator<S> for HashLocator<S> {
    fn session_by_key(&self, key: &str, _is_write: bool) -> Result<Arc<S>> {
        let table = self.router.load();
        if table.is_empty() {
            return Err(Error::Unavailable);
        }

        if let Some(session) = self.override_session(&table, key) {
            return Ok(session);
        }

        self.router.hash_select(&table, key)
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

    fn stop(&self) {
        if let Some(fetcher) = self.fetcher() {
            fetcher.halt();
        }
    }
}
