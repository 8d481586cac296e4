//! The network leader.
//!
//! A leader is an ordinary node variant wrapped with registration handling:
//! it keeps the [`NodeDirectory`] and accepts registrations addressed to
//! `o://register`. Everything else (transport setup, resolution, teardown)
//! delegates to the wrapped lifecycle, so both TCP and in-process leaders
//! come out of the same wrapper.

use crate::directory::NodeDirectory;
use crate::server::UnroutedHandler;
use crate::service::ServiceLifecycle;
use crate::virtual_node::VirtualLifecycle;
use async_trait::async_trait;
use omesh_core::{CoreConfig, Node, NodeError, NodeEvent, NodeLifecycle};
use omesh_protocol::{Address, RequestParams, ResponseResult};
use omesh_transport::{MemoryHub, Transport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Wraps a lifecycle with directory-keeping registration handling.
pub struct LeaderLifecycle {
    inner: Arc<dyn NodeLifecycle>,
    directory: NodeDirectory,
}

impl LeaderLifecycle {
    /// Wrap `inner`, keeping registrations in `directory`.
    pub fn new(inner: Arc<dyn NodeLifecycle>, directory: NodeDirectory) -> Self {
        Self { inner, directory }
    }

    /// The directory this leader maintains.
    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }
}

#[async_trait]
impl NodeLifecycle for LeaderLifecycle {
    async fn initialize(&self, node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError> {
        self.inner.initialize(node).await
    }

    async fn resolve(&self, node: &Arc<Node>, address: &Address) -> Result<Address, NodeError> {
        self.inner.resolve(node, address).await
    }

    /// The leader is the directory; there is no one to register with.
    async fn register(&self, node: &Arc<Node>) -> Result<(), NodeError> {
        debug!(address = %node.address(), "leader up, directory open");
        Ok(())
    }

    async fn teardown(&self, node: &Arc<Node>) -> Result<(), NodeError> {
        self.inner.teardown(node).await
    }

    async fn handle_registration(
        &self,
        node: &Arc<Node>,
        params: &RequestParams,
    ) -> Result<ResponseResult, NodeError> {
        let address = params
            .payload
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Lifecycle("registration missing address".into()))?;
        let peer_id = params
            .payload
            .get("peerId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let endpoints: Vec<String> = params
            .payload
            .get("endpoints")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let entry = self.directory.register(address, peer_id, endpoints);
        info!(leader = %node.address(), address = %entry.address, "registration accepted");
        node.events().emit(NodeEvent::RegistrationAccepted {
            address: entry.address.clone(),
        });

        let mut result = ResponseResult {
            kind: Some("registered".into()),
            ..ResponseResult::default()
        };
        result
            .extra
            .insert("address".into(), Value::String(entry.address));
        Ok(result)
    }
}

/// A leader serving over TCP at `listen`.
pub fn tcp_leader(config: CoreConfig, listen: impl Into<String>, directory: NodeDirectory) -> Arc<Node> {
    let inner = Arc::new(ServiceLifecycle::new(listen, Arc::new(UnroutedHandler)));
    Node::new(config, Arc::new(LeaderLifecycle::new(inner, directory)))
}

/// A leader serving on an in-process hub.
pub fn virtual_leader(config: CoreConfig, hub: &MemoryHub, directory: NodeDirectory) -> Arc<Node> {
    let inner = Arc::new(VirtualLifecycle::new(
        hub.clone(),
        Arc::new(UnroutedHandler),
    ));
    Node::new(config, Arc::new(LeaderLifecycle::new(inner, directory)))
}

