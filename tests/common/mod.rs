#![allow(dead_code)]
use memcached_locator::Session;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct TestSession {
    addr: SocketAddr,
    weight: usize,
    closed: AtomicBool,
}

impl TestSession {
    pub fn new(addr: &str) -> Arc<TestSession> {
        TestSession::weighted(addr, 1)
    }

    pub fn weighted(addr: &str, weight: usize) -> Arc<TestSession> {
        Arc::new(TestSession {
            addr: addr.parse().expect("invalid test address"),
            weight,
            closed: AtomicBool::new(false),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Session for TestSession {
    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn weight(&self) -> usize {
        self.weight
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// One session per host `10.0.0.1` .. `10.0.0.n`.
pub fn cluster(n: usize) -> Vec<Arc<TestSession>> {
    (1..=n)
        .map(|i| TestSession::new(&format!("10.0.0.{i}:11211")))
        .collect()
}

/// Polls `check` until it holds, panicking after five seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Routes the crate's logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
