//! Node lifecycle hooks.
//!
//! Concrete node variants differ in how they set up their transport, how
//! they announce themselves, and whether they accept registrations. Those
//! differences live behind [`NodeLifecycle`], a capability set the core
//! [`crate::Node`] holds a value of, rather than a subclass hierarchy.

use crate::error::NodeError;
use crate::node::Node;
use async_trait::async_trait;
use omesh_protocol::address::REGISTRATION_ADDRESS;
use omesh_protocol::{Address, RequestParams, ResponseResult};
use omesh_transport::Transport;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Overridable lifecycle behavior for a node.
#[async_trait]
pub trait NodeLifecycle: Send + Sync + 'static {
    /// Establish the node's transport (and any listeners it serves on).
    ///
    /// Called once per `start()`, before the connection manager exists.
    async fn initialize(&self, node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError>;

    /// Resolve a logical address to one carrying dialable endpoints.
    ///
    /// The default passes the address through untouched; variants that know
    /// how to find endpoints (a local hub, a configured leader) override it.
    async fn resolve(&self, _node: &Arc<Node>, address: &Address) -> Result<Address, NodeError> {
        Ok(address.clone())
    }

    /// Announce this node's presence.
    ///
    /// The default routes a registration request to the configured leader's
    /// `o://register` service, carrying the node's address, peer id, and
    /// endpoints. Without a configured leader it is a no-op.
    async fn register(&self, node: &Arc<Node>) -> Result<(), NodeError> {
        let Some(leader) = node.config().leader.clone() else {
            debug!(address = %node.address(), "no leader configured, skipping registration");
            return Ok(());
        };
        let target =
            Address::with_endpoints(REGISTRATION_ADDRESS, leader.endpoints().to_vec());

        let address = node.address();
        let mut payload = Map::new();
        payload.insert("address".into(), Value::String(address.value().to_string()));
        payload.insert("peerId".into(), Value::String(node.peer_id()));
        payload.insert(
            "endpoints".into(),
            Value::Array(
                address
                    .endpoints()
                    .iter()
                    .map(|e| Value::String(e.clone()))
                    .collect(),
            ),
        );

        let response = node
            .invoke(&target, RequestParams::from_payload(payload))
            .await?;
        if response.result.is_error() {
            return Err(NodeError::Lifecycle(format!(
                "registration rejected for {address}"
            )));
        }
        debug!(address = %address, "registered with leader");
        Ok(())
    }

    /// Collaborator-defined cleanup, run by `stop()` before child tools are
    /// stopped. The default does nothing.
    async fn teardown(&self, _node: &Arc<Node>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Accept a registration from another node.
    ///
    /// Only directory-keeping variants (the leader) implement this; the
    /// default refuses.
    async fn handle_registration(
        &self,
        _node: &Arc<Node>,
        _params: &RequestParams,
    ) -> Result<ResponseResult, NodeError> {
        Err(NodeError::Lifecycle(
            "this node does not accept registrations".into(),
        ))
    }
}
