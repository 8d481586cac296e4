//! TCP-backed service nodes.

use crate::server::{NodeServer, RequestHandler};
use async_trait::async_trait;
use omesh_core::{CoreConfig, Node, NodeError, NodeLifecycle};
use omesh_protocol::Address;
use omesh_transport::{serve_tcp, TcpTransport, Transport, TransportError};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle of a node that serves its address over TCP.
///
/// `initialize` binds the listen address, records the bound socket as the
/// node's endpoint, and serves inbound streams with a [`NodeServer`].
/// Endpoint-less addresses resolve through the configured leader, which is
/// where this node's registration ends up too.
pub struct ServiceLifecycle {
    listen: String,
    handler: Arc<dyn RequestHandler>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceLifecycle {
    /// Serve on `listen` (e.g. `127.0.0.1:0`) with the given route handler.
    pub fn new(listen: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            listen: listen.into(),
            handler,
            server: Mutex::new(None),
        }
    }
}

#[async_trait]
impl NodeLifecycle for ServiceLifecycle {
    async fn initialize(&self, node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError> {
        let listener = TcpListener::bind(self.listen.as_str())
            .await
            .map_err(|e| NodeError::Transport(TransportError::Io(e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| NodeError::Transport(TransportError::Io(e)))?;
        node.add_endpoint(local.to_string());
        info!(address = %node.address(), endpoint = %local, "serving over tcp");

        let server = serve_tcp(
            listener,
            NodeServer::new(Arc::clone(node), Arc::clone(&self.handler)),
        );
        let mut slot = self.server.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(server) {
            previous.abort();
        }
        Ok(Arc::new(TcpTransport::new()))
    }

    async fn resolve(&self, node: &Arc<Node>, address: &Address) -> Result<Address, NodeError> {
        if !address.endpoints().is_empty() {
            return Ok(address.clone());
        }
        // No endpoints known: the configured leader fronts the network.
        if let Some(leader) = node.config().leader.as_ref() {
            if !leader.endpoints().is_empty() {
                debug!(address = %address, "resolving through leader");
                return Ok(Address::with_endpoints(
                    address.value(),
                    leader.endpoints().to_vec(),
                ));
            }
        }
        Ok(address.clone())
    }

    async fn teardown(&self, node: &Arc<Node>) -> Result<(), NodeError> {
        let server = self
            .server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(server) = server {
            debug!(address = %node.address(), "stopping tcp server");
            server.abort();
        }
        Ok(())
    }
}

/// A node serving `config.address` over TCP at `listen`.
pub fn service_node(
    config: CoreConfig,
    listen: impl Into<String>,
    handler: Arc<dyn RequestHandler>,
) -> Arc<Node> {
    Node::new(config, Arc::new(ServiceLifecycle::new(listen, handler)))
}
