use std::io;

/// Result type for locator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for [`SessionLocator`](crate::SessionLocator) and controller operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No live session could be selected: the routing table is empty or every bucket was
    /// probed without finding an open session.
    #[error("no session available")]
    Unavailable,
    /// A read was issued for a key that has never been written through a replica locator.
    #[error("key `{0}` has no replica set")]
    NotReplicated(String),
    /// Connect error.
    /// Useful for distinguishing between transitive I/O errors and connection errors.
    #[error("connect: {0}")]
    Connect(io::Error),
    /// I/O-related error.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A controller record that does not match the expected `key<SEP>hosts` layout.
    #[error("protocol: {0}")]
    Protocol(String),
    /// Invalid locator or controller configuration.
    #[error("config: {0}")]
    Config(String),
    /// A background task was requested outside of a tokio runtime.
    #[error("no tokio runtime available to spawn the override fetcher")]
    NoRuntime,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unavailable, Self::Unavailable) => true,
            (Self::NotReplicated(k1), Self::NotReplicated(k2)) => k1 == k2,
            (Self::Connect(e1), Self::Connect(e2)) => e1.kind() == e2.kind(),
            (Self::Io(e1), Self::Io(e2)) => e1.kind() == e2.kind(),
            (Self::Protocol(s1), Self::Protocol(s2)) => s1 == s2,
            (Self::Config(s1), Self::Config(s2)) => s1 == s2,
            (Self::NoRuntime, Self::NoRuntime) => true,
            _ => false,
        }
    }
}
