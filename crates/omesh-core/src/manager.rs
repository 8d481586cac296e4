//! Per-node connection cache.
//!
//! The manager caches [`Connection`]s keyed by address string. Lookups
//! validate liveness and evict dead entries, so a fresh connection is
//! transparently dialed on the next `connect`. Concurrent `connect` calls
//! for the same not-yet-cached address are single-flighted through a
//! per-address lock, so only one dial happens.

use crate::connection::Connection;
use crate::error::NodeError;
use dashmap::DashMap;
use omesh_protocol::Address;
use omesh_transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Cache and factory for connections, bound to one node's transport.
pub struct ConnectionManager {
    cache: DashMap<String, Arc<Connection>>,
    dial_locks: DashMap<String, Arc<Mutex<()>>>,
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager dialing through `transport`.
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            dial_locks: DashMap::new(),
            transport,
            request_timeout,
        }
    }

    /// Return a live cached connection or dial a fresh one.
    ///
    /// The dial runs under the manager's request deadline; a peer that never
    /// answers surfaces as `NodeError::Timeout`. Dialing failure propagates;
    /// there is no retry at this layer.
    pub async fn connect(&self, address: &Address) -> Result<Arc<Connection>, NodeError> {
        if !address.validate() {
            return Err(NodeError::InvalidAddress(address.value().to_string()));
        }
        let key = address.value().to_string();
        if let Some(connection) = self.get_cached(address) {
            return Ok(connection);
        }

        // Single-flight: one dial per address, however many callers race.
        let lock = self
            .dial_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(connection) = self.get_cached(address) {
            self.dial_locks.remove(&key);
            return Ok(connection);
        }

        debug!(address = %address, "dialing");
        let dialed = tokio::time::timeout(
            self.request_timeout,
            self.transport.dial(address.endpoints()),
        )
        .await;
        let outcome = match dialed {
            Ok(Ok(raw)) => {
                let connection = Arc::new(Connection::new(
                    address.clone(),
                    raw,
                    self.request_timeout,
                ));
                self.cache.insert(key.clone(), Arc::clone(&connection));
                Ok(connection)
            }
            Ok(Err(e)) => Err(NodeError::from(e)),
            Err(_) => Err(NodeError::Timeout {
                address: address.value().to_string(),
                seconds: self.request_timeout.as_secs(),
            }),
        };
        // The lock entry only matters while this dial is in flight.
        self.dial_locks.remove(&key);
        outcome
    }

    /// Presence check only; no validation.
    pub fn is_cached(&self, address: &Address) -> bool {
        self.cache.contains_key(address.value())
    }

    /// Look up and validate; a dead entry is evicted and `None` returned.
    pub fn get_cached(&self, address: &Address) -> Option<Arc<Connection>> {
        let key = address.value();
        let connection = self.cache.get(key).map(|entry| Arc::clone(&entry))?;
        match connection.validate() {
            Ok(()) => Some(connection),
            Err(e) => {
                warn!(address = %address, error = %e, "evicting stale connection");
                self.cache.remove(key);
                None
            }
        }
    }

    /// Close and evict the connection for an address, if cached.
    pub async fn disconnect(&self, address: &Address) -> Result<(), NodeError> {
        if let Some((_, connection)) = self.cache.remove(address.value()) {
            connection.close().await?;
        }
        Ok(())
    }

    /// Close and evict every cached connection.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, connection)) = self.cache.remove(&key) {
                if let Err(e) = connection.close().await {
                    warn!(address = %key, error = %e, "error closing connection");
                }
            }
        }
    }

    /// Number of cached connections (live or not yet validated).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
