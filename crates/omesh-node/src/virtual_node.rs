//! In-process virtual nodes.
//!
//! Virtual nodes share a [`MemoryHub`] instead of sockets: each one binds its
//! address's protocol id as its hub endpoint and dials its peers the same
//! way. The full protocol runs unchanged, handshakes included, which is what
//! makes them useful both for composing tools in one process and for tests.

use crate::server::{NodeServer, RequestHandler};
use async_trait::async_trait;
use omesh_core::{CoreConfig, Node, NodeError, NodeLifecycle};
use omesh_protocol::Address;
use omesh_transport::{MemoryHub, MemoryTransport, Transport};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lifecycle of a node living on a process-local [`MemoryHub`].
pub struct VirtualLifecycle {
    hub: MemoryHub,
    handler: Arc<dyn RequestHandler>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualLifecycle {
    /// Serve on `hub` with the given route handler.
    pub fn new(hub: MemoryHub, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            hub,
            handler,
            server: Mutex::new(None),
        }
    }
}

#[async_trait]
impl NodeLifecycle for VirtualLifecycle {
    async fn initialize(&self, node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError> {
        let endpoint = node.address().to_endpoint();
        node.add_endpoint(endpoint.clone());
        debug!(address = %node.address(), endpoint = %endpoint, "serving on memory hub");

        let server = self.hub.serve(
            endpoint,
            NodeServer::new(Arc::clone(node), Arc::clone(&self.handler)),
        );
        let mut slot = self.server.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(server) {
            previous.abort();
        }
        Ok(Arc::new(MemoryTransport::new(self.hub.clone())))
    }

    /// Endpoint-less addresses resolve to their own protocol id: on a shared
    /// hub, every node is dialable at the endpoint it bound in `initialize`.
    async fn resolve(&self, _node: &Arc<Node>, address: &Address) -> Result<Address, NodeError> {
        if !address.endpoints().is_empty() {
            return Ok(address.clone());
        }
        Ok(Address::with_endpoints(
            address.value(),
            vec![address.to_endpoint()],
        ))
    }

    async fn teardown(&self, node: &Arc<Node>) -> Result<(), NodeError> {
        self.hub.unbind(&node.address().to_endpoint());
        let server = self
            .server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(server) = server {
            server.abort();
        }
        Ok(())
    }
}

/// A node serving `config.address` on the given hub.
pub fn virtual_node(
    config: CoreConfig,
    hub: &MemoryHub,
    handler: Arc<dyn RequestHandler>,
) -> Arc<Node> {
    Node::new(
        config,
        Arc::new(VirtualLifecycle::new(hub.clone(), handler)),
    )
}
