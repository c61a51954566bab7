mod common;

use common::{cluster, eventually, init_tracing, TestSession};
use memcached_locator::{
    ControllerConfig, Error, FetcherState, HashLocator, LocatorConfig, OverrideFetcher,
    OverridePolicy, OverrideStore, Session, SessionLocator,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What the mock controller sends back for one request.
#[derive(Clone, Copy)]
enum Reply {
    /// A complete response, terminated by a blank line.
    Mapping(&'static str),
    /// Raw bytes, after which the connection is closed.
    Truncated(&'static str),
    /// No answer at all; the connection stays open.
    Silent,
}

/// Serves the `n`-th accepted connection with `scripts[n]`, repeating the last reply of a script
/// once it runs out. Connections past the last script reuse it.
async fn mock_controller(scripts: Vec<Vec<Reply>>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let script = scripts[n.min(scripts.len() - 1)].clone();

            tokio::spawn(async move {
                let mut stream = BufReader::new(stream);
                let mut request = String::new();
                for i in 0.. {
                    request.clear();
                    match stream.read_line(&mut request).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => assert_eq!(request, "2:\r\n"),
                    }

                    match script[i.min(script.len() - 1)] {
                        Reply::Mapping(body) => {
                            let response = format!("{body}\r\n");
                            if stream.get_mut().write_all(response.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        Reply::Truncated(bytes) => {
                            let _ = stream.get_mut().write_all(bytes.as_bytes()).await;
                            return;
                        }
                        Reply::Silent => {
                            std::future::pending::<()>().await;
                        }
                    }
                }
            });
        }
    });

    (addr, accepted)
}

fn controller_config(addr: SocketAddr) -> ControllerConfig {
    ControllerConfig::new(addr.ip().to_string(), addr.port()).with_poll_interval(POLL_INTERVAL)
}

fn hosts(store: &OverrideStore, key: &str) -> Vec<String> {
    store
        .get(key)
        .map(|hosts| hosts.iter().map(|h| h.to_string()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_fetcher_applies_controller_mapping() {
    init_tracing();
    let (addr, _) = mock_controller(vec![vec![Reply::Mapping(
        "key1:10.0.0.1,10.0.0.2\r\nkey2:10.0.0.3\r\n",
    )]])
    .await;

    let store = Arc::new(OverrideStore::new());
    let fetcher = OverrideFetcher::spawn(controller_config(addr), Arc::clone(&store)).unwrap();

    eventually("mapping to be applied", || store.len() == 2).await;
    assert_eq!(hosts(&store, "key1"), ["10.0.0.1", "10.0.0.2"]);
    assert_eq!(hosts(&store, "key2"), ["10.0.0.3"]);

    eventually("several polls", || fetcher.successful_polls() >= 3).await;
    assert_eq!(fetcher.failed_polls(), 0);

    fetcher.shutdown().await;
}

#[tokio::test]
async fn test_dropped_connection_keeps_stale_entries_until_reconnect() {
    init_tracing();
    let (addr, accepted) = mock_controller(vec![
        vec![
            Reply::Mapping("key1:hostA\r\nkey2:hostB\r\n"),
            Reply::Truncated("key1:hostA\r\nkey2:ho"),
        ],
        vec![Reply::Mapping("key1:hostC\r\n")],
    ])
    .await;

    let store = Arc::new(OverrideStore::new());
    let fetcher = OverrideFetcher::spawn(controller_config(addr), Arc::clone(&store)).unwrap();

    eventually("reconnect", || accepted.load(Ordering::SeqCst) >= 2).await;
    eventually("fresh entry", || hosts(&store, "key1") == ["hostC"]).await;

    // Never repeated by the second connection, so the last applied value stays.
    assert_eq!(hosts(&store, "key2"), ["hostB"]);
    assert!(fetcher.failed_polls() >= 1);

    fetcher.shutdown().await;
}

#[tokio::test]
async fn test_malformed_record_keeps_the_connection() {
    init_tracing();
    let (addr, accepted) = mock_controller(vec![vec![
        Reply::Mapping("key1:hostA\r\nbroken\r\nkey2:hostB\r\n"),
        Reply::Mapping("key1:hostC\r\n"),
    ]])
    .await;

    let store = Arc::new(OverrideStore::new());
    let fetcher = OverrideFetcher::spawn(controller_config(addr), Arc::clone(&store)).unwrap();

    eventually("second response", || hosts(&store, "key1") == ["hostC"]).await;
    eventually("several polls", || fetcher.successful_polls() >= 3).await;

    // Records after the malformed line were skipped, but the connection was reused.
    assert!(!store.contains_key("key2"));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.failed_polls(), 0);

    fetcher.shutdown().await;
}

#[tokio::test]
async fn test_silent_controller_times_out_and_reconnects() {
    init_tracing();
    let (addr, accepted) = mock_controller(vec![vec![Reply::Silent]]).await;

    let store = Arc::new(OverrideStore::new());
    let config = controller_config(addr).with_read_timeout(Duration::from_millis(100));
    let fetcher = OverrideFetcher::spawn(config, Arc::clone(&store)).unwrap();

    eventually("timed out polls", || fetcher.failed_polls() >= 2).await;
    assert!(accepted.load(Ordering::SeqCst) >= 2);
    assert_eq!(fetcher.successful_polls(), 0);
    assert!(store.is_empty());

    tokio::time::timeout(Duration::from_secs(1), fetcher.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_controller_keeps_retrying() {
    init_tracing();
    // Bind and drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let store = Arc::new(OverrideStore::new());
    let fetcher = OverrideFetcher::spawn(controller_config(addr), Arc::clone(&store)).unwrap();

    eventually("connect failures", || fetcher.failed_polls() >= 2).await;
    assert_eq!(fetcher.successful_polls(), 0);
    assert!(store.is_empty());
    assert!(!fetcher.is_halted());

    fetcher.shutdown().await;
}

#[tokio::test]
async fn test_halt_stops_the_loop() {
    init_tracing();
    let (addr, _) = mock_controller(vec![vec![Reply::Mapping("key1:hostA\r\n")]]).await;

    let store = Arc::new(OverrideStore::new());
    let config = controller_config(addr).with_poll_interval(Duration::from_secs(3600));
    let fetcher = OverrideFetcher::spawn(config, Arc::clone(&store)).unwrap();

    eventually("first poll", || fetcher.successful_polls() == 1).await;
    fetcher.halt();
    assert!(fetcher.is_halted());

    // The hour-long sleep is interrupted by the halt.
    eventually("halted state", || fetcher.state() == FetcherState::Halted).await;
    assert_eq!(fetcher.successful_polls(), 1);

    tokio::time::timeout(Duration::from_secs(1), fetcher.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_locator_routes_by_polled_overrides() {
    init_tracing();
    let (addr, _) = mock_controller(vec![vec![Reply::Mapping(
        "key1:10.0.0.1:11211,10.0.0.2:11211\r\n",
    )]])
    .await;

    let controller = controller_config(addr).with_strip_ports(true);
    let config = LocatorConfig::default().with_controller(controller, OverridePolicy::RoundRobin);
    let locator = HashLocator::<TestSession>::from_config(&config).unwrap();
    locator.update_sessions(&cluster(3));

    let store = Arc::clone(locator.override_store().unwrap());
    eventually("override entry", || store.contains_key("key1")).await;

    let hosts: Vec<String> = (0..3)
        .map(|_| locator.session_by_key("key1", false).unwrap().remote_host())
        .collect();
    assert_eq!(hosts, ["10.0.0.1", "10.0.0.2", "10.0.0.1"]);

    locator.stop();
    let fetcher = locator.fetcher().unwrap();
    assert!(fetcher.is_halted());
    eventually("halted state", || fetcher.state() == FetcherState::Halted).await;

    // Routing keeps working off the last mapping after the fetcher is gone.
    let session = locator.session_by_key("key1", false).unwrap();
    assert_eq!(session.remote_host(), "10.0.0.2");
}

#[test]
fn test_locator_with_controller_needs_a_runtime() {
    let config = LocatorConfig::default().with_controller(
        ControllerConfig::new("127.0.0.1", 7000),
        OverridePolicy::Random,
    );
    assert!(matches!(
        HashLocator::<TestSession>::from_config(&config),
        Err(Error::NoRuntime)
    ));
}
