//! Background polling of the mapping controller.
//!
//! The fetcher owns one controller connection and cycles through
//! `Connecting -> Polling -> (on I/O error or timeout) Reconnecting -> Connecting`. Every cycle writes the
//! configured request, applies each returned record to the [`OverrideStore`] and then sleeps for
//! the poll interval, which doubles as the reconnect backoff. Failures never leave the task:
//! lookups simply keep seeing the last mapping that was applied.
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::overrides::OverrideStore;
use crate::parser::{parse_line, parse_record, RecordFormat};

/// Longest response line accepted from the controller, terminator included.
const MAX_LINE_LEN: usize = 64 * 1024;

/// Where the poll loop currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FetcherState {
    /// Opening the controller connection.
    Connecting = 0,
    /// Exchanging a request and response with the controller.
    Polling = 1,
    /// Waiting out the poll interval after a failure.
    Reconnecting = 2,
    /// The loop has exited.
    Halted = 3,
}

impl FetcherState {
    fn from_u8(v: u8) -> FetcherState {
        match v {
            0 => FetcherState::Connecting,
            1 => FetcherState::Polling,
            2 => FetcherState::Reconnecting,
            _ => FetcherState::Halted,
        }
    }
}

struct Shared {
    halted: AtomicBool,
    wake: Notify,
    state: AtomicU8,
    polls: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: FetcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

/// Handle to a running poll loop.
///
/// Dropping the handle halts the loop.
pub struct OverrideFetcher {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl OverrideFetcher {
    /// Spawns the poll loop on the current tokio runtime.
    pub fn spawn(config: ControllerConfig, store: Arc<OverrideStore>) -> Result<Self, Error> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let shared = Arc::new(Shared {
            halted: AtomicBool::new(false),
            wake: Notify::new(),
            state: AtomicU8::new(FetcherState::Connecting as u8),
            polls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let handle = runtime.spawn(run(config, store, Arc::clone(&shared)));

        Ok(OverrideFetcher {
            shared,
            handle: Some(handle),
        })
    }

    /// Asks the loop to stop.
    ///
    /// The flag is checked once per cycle; a sleeping loop wakes immediately, but a poll that is
    /// already waiting on the controller runs until it completes or hits the read timeout.
    pub fn halt(&self) {
        self.shared.halted.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Whether [`halt`](OverrideFetcher::halt) has been called.
    pub fn is_halted(&self) -> bool {
        self.shared.is_halted()
    }

    /// Current state of the loop.
    pub fn state(&self) -> FetcherState {
        FetcherState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Number of poll cycles that completed without an I/O error.
    pub fn successful_polls(&self) -> u64 {
        self.shared.polls.load(Ordering::Acquire)
    }

    /// Number of cycles that failed to connect or lost the connection.
    pub fn failed_polls(&self) -> u64 {
        self.shared.failures.load(Ordering::Acquire)
    }

    /// Halts the loop and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.halt();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "override fetcher task ended abnormally");
            }
        }
    }
}

impl Drop for OverrideFetcher {
    fn drop(&mut self) {
        self.halt();
    }
}

async fn run(config: ControllerConfig, store: Arc<OverrideStore>, shared: Arc<Shared>) {
    let addr = config.addr();
    let format = config.record_format();
    let terminator = config.line_terminator as u8;
    let mut conn: Option<Connection> = None;
    let mut buf = BytesMut::new();

    while !shared.is_halted() {
        if conn.is_none() {
            shared.set_state(FetcherState::Connecting);
            match Connection::new(&addr, config.connect_timeout).await {
                Ok(c) => {
                    info!(controller = %addr, "connected to controller");
                    conn = Some(c);
                }
                Err(e) => {
                    warn!(controller = %addr, error = %e, "failed to connect to controller, retrying after poll interval");
                    shared.failures.fetch_add(1, Ordering::AcqRel);
                    shared.set_state(FetcherState::Reconnecting);
                }
            }
        }

        if let Some(c) = conn.as_mut() {
            shared.set_state(FetcherState::Polling);
            let exchange = poll_once(c, &mut buf, &config.request, terminator, format, &store);
            let result = match tokio::time::timeout(config.read_timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(Error::Io(io::ErrorKind::TimedOut.into())),
            };
            match result {
                Ok(outcome) => {
                    shared.polls.fetch_add(1, Ordering::AcqRel);
                    debug!(
                        applied = outcome.applied,
                        skipped = outcome.skipped,
                        entries = store.len(),
                        "override mapping refreshed"
                    );
                    if outcome.closed {
                        debug!(controller = %addr, "controller closed the connection");
                        conn = None;
                        shared.set_state(FetcherState::Reconnecting);
                    }
                }
                Err(e) => {
                    warn!(controller = %addr, error = %e, "controller poll failed, reconnecting after poll interval");
                    shared.failures.fetch_add(1, Ordering::AcqRel);
                    conn = None;
                    buf.clear();
                    shared.set_state(FetcherState::Reconnecting);
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shared.wake.notified() => {}
        }
    }

    shared.set_state(FetcherState::Halted);
    debug!(controller = %addr, "override fetcher halted");
}

/// Result of one poll cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PollOutcome {
    /// Records written to the store.
    pub applied: usize,
    /// Records ignored after a malformed one.
    pub skipped: usize,
    /// The controller ended the response by closing the connection.
    pub closed: bool,
}

/// Runs one request/response exchange with the controller.
///
/// A malformed record stops further records from being applied, but the response is still read
/// to its end so the connection can be reused. Any I/O error is returned to the caller, which is
/// expected to drop the connection.
pub(crate) async fn poll_once<T>(
    conn: &mut T,
    buf: &mut BytesMut,
    request: &str,
    terminator: u8,
    format: RecordFormat,
    store: &OverrideStore,
) -> Result<PollOutcome, Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_all(request.as_bytes()).await?;
    conn.flush().await?;

    let mut outcome = PollOutcome::default();
    let mut aborted = false;

    loop {
        let line = match read_line(conn, buf, terminator).await? {
            Some(line) => line,
            None => {
                outcome.closed = true;
                break;
            }
        };

        if line.is_empty() {
            break;
        }

        if aborted {
            outcome.skipped += 1;
            continue;
        }

        match parse_record(&line, format) {
            Ok(record) => {
                store.insert(record.key, record.hosts);
                outcome.applied += 1;
            }
            Err(e) => {
                warn!(error = %e, "ignoring the rest of the controller response");
                aborted = true;
                outcome.skipped += 1;
            }
        }
    }

    Ok(outcome)
}

/// Reads the next line, or `None` if the peer closed the stream on a line boundary.
async fn read_line<T>(conn: &mut T, buf: &mut BytesMut, terminator: u8) -> Result<Option<Bytes>, Error>
where
    T: AsyncRead + Unpin,
{
    loop {
        if let Some((n, len)) = parse_line(buf, terminator).map(|(n, line)| (n, line.len())) {
            let mut line = buf.split_to(n);
            line.truncate(len);
            return Ok(Some(line.freeze()));
        }

        if buf.len() >= MAX_LINE_LEN {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("controller line exceeds {MAX_LINE_LEN} bytes"),
            )));
        }

        buf.reserve(1024);
        let n = conn.read_buf(buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
        }
    }
}
