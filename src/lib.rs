//! Session locators for memcached clients.
//!
//! A locator decides which connection ("session") serves a key. Sessions are grouped by the node
//! they connect to, each node is repeated in a routing table according to its weight, and keys are
//! mapped onto that table by hash. Closed sessions are skipped by probing forward through the
//! table unless failure mode is on.
//!
//! [`HashLocator`] can additionally follow placement overrides published by a mapping controller,
//! which an [`OverrideFetcher`] polls in the background. [`ReplicaLocator`] instead replicates each
//! key to a bounded number of distinct hosts, one more host per write.
//!
//! ```no_run
//! use memcached_locator::{HashLocator, SessionLocator};
//! # use memcached_locator::Session;
//! # use std::net::SocketAddr;
//! # use std::sync::Arc;
//! # struct Conn(SocketAddr);
//! # impl Session for Conn {
//! #     fn remote_addr(&self) -> SocketAddr { self.0 }
//! #     fn is_closed(&self) -> bool { false }
//! # }
//! let locator = HashLocator::new();
//! locator.update_sessions(&[
//!     Arc::new(Conn("10.0.0.1:11211".parse().unwrap())),
//!     Arc::new(Conn("10.0.0.2:11211".parse().unwrap())),
//! ]);
//!
//! match locator.session_by_key("user:42", false) {
//!     Ok(session) => println!("route to {}", session.remote_addr()),
//!     Err(e) => println!("no route: {}", e),
//! }
//! ```
#![deny(warnings, missing_docs)]
mod connection;

pub mod config;
pub use self::config::{ControllerConfig, LocatorConfig, LocatorKind};

mod error;
pub use self::error::{Error, Result};

pub mod fetcher;
pub use self::fetcher::{FetcherState, OverrideFetcher};

pub mod group;
pub use self::group::ServerGroup;

pub mod hash;
pub use self::hash::{HashAlgorithm, KeyHasher};

mod locator;
pub use self::locator::{build_locator, HashLocator, ReplicaLocator, SessionLocator};

pub mod overrides;
pub use self::overrides::{AccessCursor, OverridePolicy, OverrideStore};

pub mod parser;
pub use self::parser::{OverrideRecord, RecordFormat};

pub mod routing;
pub use self::routing::RoutingTable;

mod session;
pub use self::session::Session;
