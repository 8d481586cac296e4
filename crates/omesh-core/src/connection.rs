//! One logical channel to a remote address.
//!
//! A [`Connection`] wraps a dialed transport connection. Before any payload
//! flows it performs a handshake, exactly once per connection lifetime: the
//! first caller of [`Connection::start`] runs it, and every later or
//! concurrent caller awaits the same stored outcome, success or failure.
//! Each transmission opens its own stream, so requests are never pipelined
//! and a transient framing failure leaves the connection usable.

use crate::error::NodeError;
use futures::future::{BoxFuture, FutureExt, Shared};
use omesh_protocol::{Address, Dependency, Method, Request, RequestParams, Response};
use omesh_transport::{ConnectionStatus, RawConnection};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

type HandshakeFuture = Shared<BoxFuture<'static, Result<Response, Arc<NodeError>>>>;

/// A request/response channel to one remote address.
pub struct Connection {
    id: Uuid,
    address: Address,
    raw: Arc<dyn RawConnection>,
    request_counter: AtomicU64,
    handshake: Mutex<Option<HandshakeFuture>>,
    dependencies: RwLock<Vec<Dependency>>,
    dependencies_resolved: AtomicBool,
    timeout: Duration,
}

impl Connection {
    /// Wrap a freshly dialed transport connection.
    pub fn new(address: Address, raw: Arc<dyn RawConnection>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            raw,
            request_counter: AtomicU64::new(0),
            handshake: Mutex::new(None),
            dependencies: RwLock::new(Vec::new()),
            dependencies_resolved: AtomicBool::new(false),
            timeout,
        }
    }

    /// This connection's unique id, stamped into every request it creates.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The remote address this connection targets.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Pure liveness check; never touches protocol state.
    pub fn validate(&self) -> Result<(), NodeError> {
        match self.raw.status() {
            ConnectionStatus::Open => Ok(()),
            ConnectionStatus::Closed => Err(NodeError::ConnectionInvalid),
        }
    }

    /// Build a request: stamps the connection id and the next counter value.
    pub fn create_request(&self, method: Method, mut params: RequestParams) -> Request {
        params.connection_id = self.id.to_string();
        let id = self.request_counter.fetch_add(1, Ordering::Relaxed);
        Request::new(id, method, params)
    }

    /// Run the handshake, at most once per connection lifetime.
    ///
    /// Concurrent callers before completion all observe the same in-flight
    /// outcome; later callers get the stored result without a new exchange.
    pub async fn start(self: &Arc<Self>) -> Result<Response, NodeError> {
        self.check_open()?;
        let fut = {
            let mut slot = self.handshake.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(fut) => {
                    debug!(connection = %self.id, "handshake already started, awaiting outcome");
                    fut.clone()
                }
                None => {
                    let conn = Arc::clone(self);
                    let fut = async move {
                        let mut params = RequestParams::default();
                        params.address = Some(conn.address.value().to_string());
                        let request = conn.create_request(Method::Handshake, params);
                        let response = conn.transmit(&request).await.map_err(Arc::new)?;
                        let declared = response.result.dependencies.clone();
                        if !declared.is_empty() {
                            debug!(
                                connection = %conn.id,
                                count = declared.len(),
                                "handshake declared dependencies"
                            );
                        }
                        *conn
                            .dependencies
                            .write()
                            .unwrap_or_else(|e| e.into_inner()) = declared;
                        Ok(response)
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await.map_err(NodeError::Handshake)
    }

    /// Whether the handshake has been attempted on this connection.
    pub fn started(&self) -> bool {
        self.handshake
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Transmit one framed request and read its response.
    ///
    /// Opens a new stream scoped to the target's protocol id, writes the
    /// serialized request, half-closes the write side, reads the stream to
    /// its end, and parses the bytes as one JSON response.
    pub async fn transmit(&self, request: &Request) -> Result<Response, NodeError> {
        self.check_open()?;
        let bytes = request.to_bytes()?;
        let exchange = async {
            let mut stream = self.raw.new_stream(&self.address.protocol()).await?;
            stream.write_all(&bytes).await?;
            stream.close_write().await?;
            let reply = stream.read_to_end().await?;
            Ok::<_, NodeError>(Response::from_bytes(&reply)?)
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout {
                address: self.address.value().to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Send an application payload.
    ///
    /// Runs the handshake first if it has not completed, then frames the
    /// payload as a `route` request. The caller is responsible for having
    /// resolved declared dependencies before the payload matters to the
    /// remote; [`crate::Node::invoke`] does that.
    pub async fn send(self: &Arc<Self>, params: RequestParams) -> Result<Response, NodeError> {
        self.check_open()?;
        self.start().await?;
        let request = self.create_request(Method::Route, params);
        debug!(connection = %self.id, address = %self.address, id = request.id, "sending route request");
        self.transmit(&request).await
    }

    /// Dependencies the remote declared during the handshake.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether declared dependencies have been resolved by the owning node.
    pub fn dependencies_resolved(&self) -> bool {
        self.dependencies_resolved.load(Ordering::Acquire)
    }

    /// Record that declared dependencies were all resolved successfully.
    pub fn mark_dependencies_resolved(&self) {
        self.dependencies_resolved.store(true, Ordering::Release);
    }

    /// Close the underlying transport connection.
    ///
    /// Any further `send`/`start` fails with `ConnectionClosed`.
    pub async fn close(&self) -> Result<(), NodeError> {
        debug!(connection = %self.id, address = %self.address, "closing connection");
        self.raw.close().await?;
        Ok(())
    }

    fn check_open(&self) -> Result<(), NodeError> {
        match self.raw.status() {
            ConnectionStatus::Open => Ok(()),
            ConnectionStatus::Closed => Err(NodeError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address.value())
            .field("status", &self.raw.status())
            .finish()
    }
}
