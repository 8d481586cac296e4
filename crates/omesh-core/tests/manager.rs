//! Connection manager caching, eviction, and single-flight dialing.

mod common;

use async_trait::async_trait;
use common::ScriptedPeer;
use omesh_core::{ConnectionManager, NodeError};
use omesh_protocol::Address;
use omesh_transport::{
    MemoryHub, MemoryTransport, RawConnection, Transport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn service_address(hub: &MemoryHub, name: &str) -> (Address, tokio::task::JoinHandle<()>) {
    let address = Address::new(format!("o://{name}"));
    let server = hub.serve(address.protocol(), ScriptedPeer::new(name, log()));
    let address = Address::with_endpoints(address.value(), vec![address.protocol()]);
    (address, server)
}

/// Counts dials on the way through to a real transport.
struct CountingTransport {
    inner: MemoryTransport,
    dials: AtomicUsize,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn dial(&self, endpoints: &[String]) -> Result<Arc<dyn RawConnection>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        // Make the race window observable.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.dial(endpoints).await
    }
}

#[tokio::test]
async fn test_cache_hit_preserves_identity() {
    let hub = MemoryHub::new();
    let (address, _server) = service_address(&hub, "svc");
    let manager = ConnectionManager::new(Arc::new(MemoryTransport::new(hub)), TIMEOUT);

    let first = manager.connect(&address).await.unwrap();
    let second = manager.connect(&address).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(manager.is_cached(&address));
}

#[tokio::test]
async fn test_dead_connection_is_evicted_and_redialed() {
    let hub = MemoryHub::new();
    let (address, _server) = service_address(&hub, "svc");
    let manager = ConnectionManager::new(Arc::new(MemoryTransport::new(hub)), TIMEOUT);

    let first = manager.connect(&address).await.unwrap();
    first.close().await.unwrap();

    // Validation on lookup evicts the dead entry and a fresh dial happens.
    let second = manager.connect(&address).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    second.validate().unwrap();
}

#[tokio::test]
async fn test_get_cached_validates() {
    let hub = MemoryHub::new();
    let (address, _server) = service_address(&hub, "svc");
    let manager = ConnectionManager::new(Arc::new(MemoryTransport::new(hub)), TIMEOUT);

    assert!(manager.get_cached(&address).is_none());
    let connection = manager.connect(&address).await.unwrap();
    assert!(manager.get_cached(&address).is_some());

    connection.close().await.unwrap();
    assert!(manager.get_cached(&address).is_none());
    // Eviction happened; presence check now fails too.
    assert!(!manager.is_cached(&address));
}

#[tokio::test]
async fn test_concurrent_connect_single_flight() {
    let hub = MemoryHub::new();
    let (address, _server) = service_address(&hub, "svc");
    let transport = Arc::new(CountingTransport {
        inner: MemoryTransport::new(hub),
        dials: AtomicUsize::new(0),
    });
    let manager = Arc::new(ConnectionManager::new(transport.clone(), TIMEOUT));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        let address = address.clone();
        tasks.push(tokio::spawn(
            async move { manager.connect(&address).await },
        ));
    }
    let connections: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
    for connection in &connections[1..] {
        assert!(Arc::ptr_eq(&connections[0], connection));
    }
}

#[tokio::test]
async fn test_invalid_address_is_never_dialed() {
    let hub = MemoryHub::new();
    let transport = Arc::new(CountingTransport {
        inner: MemoryTransport::new(hub),
        dials: AtomicUsize::new(0),
    });
    let manager = ConnectionManager::new(transport.clone(), TIMEOUT);

    let err = manager
        .connect(&Address::new("svc-without-scheme"))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::InvalidAddress(_)));
    assert_eq!(transport.dials.load(Ordering::SeqCst), 0);
}

/// Accepts dials but never completes them.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn dial(&self, _endpoints: &[String]) -> Result<Arc<dyn RawConnection>, TransportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(TransportError::NoEndpoints)
    }
}

#[tokio::test]
async fn test_dial_respects_request_timeout() {
    let manager = ConnectionManager::new(Arc::new(StalledTransport), Duration::from_millis(50));

    let address = Address::with_endpoints("o://svc", vec!["/o/svc".to_string()]);
    let err = manager.connect(&address).await.unwrap_err();
    match err {
        NodeError::Timeout { address, .. } => assert_eq!(address, "o://svc"),
        other => panic!("expected Timeout, got {other}"),
    }
    assert!(!manager.is_cached(&address));
}

#[tokio::test]
async fn test_dial_failure_propagates() {
    let hub = MemoryHub::new();
    let manager = ConnectionManager::new(Arc::new(MemoryTransport::new(hub)), TIMEOUT);

    let address = Address::with_endpoints("o://ghost", vec!["/o/ghost".to_string()]);
    let err = manager.connect(&address).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Transport(TransportError::DialFailure { .. })
    ));
    assert!(!manager.is_cached(&address));
}

#[tokio::test]
async fn test_disconnect_and_close_all() {
    let hub = MemoryHub::new();
    let (a, _sa) = service_address(&hub, "a");
    let (b, _sb) = service_address(&hub, "b");
    let manager = ConnectionManager::new(Arc::new(MemoryTransport::new(hub)), TIMEOUT);

    manager.connect(&a).await.unwrap();
    manager.connect(&b).await.unwrap();
    assert_eq!(manager.len(), 2);

    manager.disconnect(&a).await.unwrap();
    assert!(!manager.is_cached(&a));

    manager.close_all().await;
    assert!(manager.is_empty());
}
