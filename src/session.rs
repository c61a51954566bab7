//! The session capability the locators need from a connection layer.
use std::net::SocketAddr;

/// Handle to one physical connection to a memcached node.
///
/// Locators never perform I/O on a session; they only group sessions by address, read their
/// weight and check whether they are still open. Several sessions may point at the same node,
/// in which case they form one [`ServerGroup`](crate::group::ServerGroup).
pub trait Session: Send + Sync {
    /// Address of the node this session is connected to.
    fn remote_addr(&self) -> SocketAddr;

    /// Host identity used by controller overrides and replica sets.
    ///
    /// Defaults to the textual IP of [`remote_addr`](Session::remote_addr), which matches the
    /// host lists a controller publishes once ports have been stripped.
    fn remote_host(&self) -> String {
        self.remote_addr().ip().to_string()
    }

    /// Relative capacity of the node. Sessions that do not support weighting keep the default.
    fn weight(&self) -> usize {
        1
    }

    /// Whether the underlying connection has been closed.
    fn is_closed(&self) -> bool;
}
