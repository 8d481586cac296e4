//! The core node.
//!
//! A [`Node`] is an addressable participant with a lifecycle state machine,
//! an owned connection manager, and an ordered set of child tool nodes
//! reachable under its namespace. `start()` and `stop()` never propagate
//! lifecycle errors: failures are recorded on the node and drive it to
//! [`NodeState::Error`], so orchestrating many children is never aborted by
//! one bad one — callers inspect `state()` and `errors()` afterwards.

use crate::connection::Connection;
use crate::error::NodeError;
use crate::events::{NodeEvent, NodeEvents};
use crate::identity::NodeIdentity;
use crate::lifecycle::NodeLifecycle;
use crate::manager::ConnectionManager;
use crate::record::NodeRecord;

use futures::future::{join_all, BoxFuture, FutureExt};
use omesh_protocol::{Address, Dependency, RequestParams, Response, ResponseResult};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Lifecycle states of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Initial state; the only state `start()` accepts.
    Stopped,
    /// `start()` is running.
    Starting,
    /// Fully started: initialized, tools up, registered.
    Running,
    /// `stop()` is running.
    Stopping,
    /// A lifecycle hook failed. Terminal; inspect `errors()`.
    Error,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Stopped => "stopped",
            NodeState::Starting => "starting",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// What kind of participant a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Keeps the network directory and accepts registrations.
    Leader,
    /// An ordinary addressable node.
    Node,
    /// A child node reachable through its parent's namespace.
    Tool,
    /// An in-process node over the memory transport.
    Virtual,
    /// Not specified.
    #[default]
    Unknown,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeType::Leader => "leader",
            NodeType::Node => "node",
            NodeType::Tool => "tool",
            NodeType::Virtual => "virtual",
            NodeType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Node construction config.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// The node's logical address.
    pub address: Address,
    /// What kind of node this is.
    pub node_type: NodeType,
    /// Optional human-readable name, used in logs only.
    pub name: Option<String>,
    /// Optional seed phrase for a deterministic identity.
    pub seed: Option<String>,
    /// The network leader to register with, if any. Carries the leader's
    /// dialable endpoints.
    pub leader: Option<Address>,
    /// Dependencies this node declares in its own handshake responses.
    pub dependencies: Vec<Dependency>,
    /// Parameters this node advertises in its handshake responses.
    pub parameters: Map<String, serde_json::Value>,
    /// Deadline applied to every dial and transmit.
    pub request_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            address: Address::new("o://node"),
            node_type: NodeType::Unknown,
            name: None,
            seed: None,
            leader: None,
            dependencies: Vec::new(),
            parameters: Map::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// An addressable participant with a lifecycle and child tools.
pub struct Node {
    config: CoreConfig,
    address: RwLock<Address>,
    identity: NodeIdentity,
    state: RwLock<NodeState>,
    errors: Mutex<Vec<NodeError>>,
    tools: Mutex<Vec<Arc<Node>>>,
    manager: RwLock<Option<Arc<ConnectionManager>>>,
    lifecycle: Arc<dyn NodeLifecycle>,
    events: NodeEvents,
}

impl Node {
    /// Create a stopped node with the given lifecycle behavior.
    pub fn new(config: CoreConfig, lifecycle: Arc<dyn NodeLifecycle>) -> Arc<Self> {
        let identity = NodeIdentity::from_optional_seed(config.seed.as_deref());
        let address = config.address.clone();
        Arc::new(Self {
            config,
            address: RwLock::new(address),
            identity,
            state: RwLock::new(NodeState::Stopped),
            errors: Mutex::new(Vec::new()),
            tools: Mutex::new(Vec::new()),
            manager: RwLock::new(None),
            lifecycle,
            events: NodeEvents::new(),
        })
    }

    /// The construction config.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The node's address, including endpoints resolved so far.
    pub fn address(&self) -> Address {
        self.address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record a dialable endpoint for this node's own address.
    pub fn add_endpoint(&self, endpoint: impl Into<String>) {
        self.address
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_endpoint(endpoint);
    }

    /// Hex peer id derived from the node's identity.
    pub fn peer_id(&self) -> String {
        self.identity.peer_id()
    }

    /// The node's identity.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Human-readable copies of every recorded lifecycle error.
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    /// Whether any lifecycle error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self
            .errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Subscribe to this node's events; drop the receiver to release.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// The node's event channel, for lifecycle implementations.
    pub fn events(&self) -> &NodeEvents {
        &self.events
    }

    /// The persisted form of this node.
    pub fn record(&self) -> NodeRecord {
        NodeRecord {
            address: self.address().value().to_string(),
            node_type: self.config.node_type.to_string(),
            peer_id: self.peer_id(),
        }
    }

    fn set_state(&self, to: NodeState) {
        let from = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            debug!(address = %self.address(), %from, %to, "state changed");
            self.events.emit(NodeEvent::StateChanged {
                address: self.address().value().to_string(),
                from,
                to,
            });
        }
    }

    fn record_error(&self, err: NodeError) {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(err);
    }

    /// The connection manager, once the node has started.
    pub fn connection_manager(&self) -> Result<Arc<ConnectionManager>, NodeError> {
        self.manager
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| NodeError::NotRunning(self.address().value().to_string()))
    }

    /// Resolve an address through the connection manager.
    pub async fn connect(&self, address: &Address) -> Result<Arc<Connection>, NodeError> {
        self.connection_manager()?.connect(address).await
    }

    /// Reach a logical address: connect, handshake, resolve declared
    /// dependencies, then send the payload.
    ///
    /// Dependencies are resolved in declaration order, sequentially, by
    /// recursively invoking their addresses; the payload is only transmitted
    /// after all of them resolved, and the first failure aborts the send.
    pub fn invoke<'a>(
        self: &'a Arc<Self>,
        address: &'a Address,
        params: RequestParams,
    ) -> BoxFuture<'a, Result<Response, NodeError>> {
        async move {
            debug!(address = %address, node = %self.address(), "invoking");
            let resolved = self.lifecycle.resolve(self, address).await?;
            let connection = self.connect(&resolved).await?;
            connection.start().await?;

            if !connection.dependencies_resolved() {
                for dependency in connection.dependencies() {
                    debug!(
                        dependency = %dependency.address,
                        target = %address,
                        "resolving declared dependency"
                    );
                    let dep_address = Address::new(dependency.address.clone());
                    let dep_params = RequestParams::from_payload(dependency.parameters.clone());
                    self.invoke(&dep_address, dep_params).await.map_err(|e| {
                        NodeError::DependencyFailed {
                            address: dependency.address.clone(),
                            source: Box::new(e),
                        }
                    })?;
                }
                connection.mark_dependencies_resolved();
            }

            connection.send(params).await
        }
        .boxed()
    }

    /// Accept a registration from another node (delegates to the lifecycle).
    pub async fn handle_registration(
        self: &Arc<Self>,
        params: &RequestParams,
    ) -> Result<ResponseResult, NodeError> {
        self.lifecycle.handle_registration(self, params).await
    }

    /// Add a child tool, addressed under this node's namespace.
    ///
    /// At most one tool per distinct address; duplicates are a configuration
    /// error, never silently ignored.
    pub fn add_tool(&self, tool: Arc<Node>) -> Result<(), NodeError> {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let address = tool.config.address.value().to_string();
        if tools.iter().any(|t| t.config.address.value() == address) {
            return Err(NodeError::DuplicateTool(address));
        }
        tools.push(tool);
        Ok(())
    }

    /// Find a child tool by its (unencapsulated) address.
    pub fn get_tool(&self, address: &Address) -> Result<Arc<Node>, NodeError> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools
            .iter()
            .find(|t| t.config.address.value() == address.value())
            .cloned()
            .ok_or_else(|| NodeError::ToolNotFound(self.tool_address(address).value().to_string()))
    }

    /// The encapsulated address of a tool under this node's namespace.
    pub fn tool_address(&self, address: &Address) -> Address {
        Address::encapsulate(&self.address(), address)
    }

    /// Snapshot of the child tools, in insertion order.
    pub fn tools(&self) -> Vec<Arc<Node>> {
        self.tools
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start the node.
    ///
    /// No-op with a warning unless currently `Stopped`. Runs `initialize`,
    /// builds the connection manager, starts child tools concurrently, then
    /// `register`. Errors are recorded, not propagated; on failure the node
    /// lands in `Error`.
    pub async fn start(self: &Arc<Self>) {
        if self.state() != NodeState::Stopped {
            warn!(address = %self.address(), state = %self.state(), "node is not stopped, skipping start");
            return;
        }
        self.set_state(NodeState::Starting);
        match self.run_startup().await {
            Ok(()) => {
                info!(address = %self.address(), "node running");
                self.set_state(NodeState::Running);
            }
            Err(e) => {
                error!(address = %self.address(), error = %e, "node failed to start");
                self.record_error(e);
                self.set_state(NodeState::Error);
            }
        }
    }

    async fn run_startup(self: &Arc<Self>) -> Result<(), NodeError> {
        let transport = self.lifecycle.initialize(self).await?;
        let manager = Arc::new(ConnectionManager::new(
            transport,
            self.config.request_timeout,
        ));
        *self.manager.write().unwrap_or_else(|e| e.into_inner()) = Some(manager);

        self.start_tools().await;
        self.lifecycle.register(self).await?;
        self.events.emit(NodeEvent::Registered {
            address: self.address().value().to_string(),
            peer_id: self.peer_id(),
        });
        Ok(())
    }

    /// Start every child tool concurrently and wait for all of them.
    ///
    /// A failing tool records its own errors and lands in `Error`; it does
    /// not prevent its siblings from completing or this node from running.
    async fn start_tools(self: &Arc<Self>) {
        let tools = self.tools();
        if tools.is_empty() {
            return;
        }
        debug!(address = %self.address(), count = tools.len(), "starting tools");
        let startups = tools.iter().map(|tool| {
            let tool = Arc::clone(tool);
            async move {
                tool.start().await;
                tool
            }
        });
        for tool in join_all(startups).await {
            let address = self.tool_address(&tool.config.address);
            if tool.state() == NodeState::Error {
                warn!(tool = %address, "tool failed to start");
                self.events.emit(NodeEvent::ToolFailed {
                    address: address.value().to_string(),
                });
            } else {
                self.events.emit(NodeEvent::ToolStarted {
                    address: address.value().to_string(),
                });
            }
        }
    }

    /// Stop the node: teardown, stop child tools, close connections.
    ///
    /// Like `start()`, failures are recorded rather than propagated.
    pub async fn stop(self: &Arc<Self>) {
        debug!(address = %self.address(), "stop called");
        self.set_state(NodeState::Stopping);
        match self.run_shutdown().await {
            Ok(()) => {
                info!(address = %self.address(), "node stopped");
                self.set_state(NodeState::Stopped);
            }
            Err(e) => {
                error!(address = %self.address(), error = %e, "node failed to stop");
                self.record_error(e);
                self.set_state(NodeState::Error);
            }
        }
    }

    async fn run_shutdown(self: &Arc<Self>) -> Result<(), NodeError> {
        self.lifecycle.teardown(self).await?;

        let tools = self.tools();
        let shutdowns = tools.iter().map(|tool| {
            let tool = Arc::clone(tool);
            async move { tool.stop().await }
        });
        join_all(shutdowns).await;

        if let Ok(manager) = self.connection_manager() {
            manager.close_all().await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address().value())
            .field("type", &self.config.node_type)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use omesh_transport::{MemoryHub, MemoryTransport, Transport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lifecycle stub over the memory transport with switchable failures.
    struct StubLifecycle {
        hub: MemoryHub,
        fail_initialize: bool,
        fail_register: bool,
        registrations: AtomicUsize,
    }

    impl StubLifecycle {
        fn new(hub: MemoryHub) -> Self {
            Self {
                hub,
                fail_initialize: false,
                fail_register: false,
                registrations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NodeLifecycle for StubLifecycle {
        async fn initialize(&self, _node: &Arc<Node>) -> Result<Arc<dyn Transport>, NodeError> {
            if self.fail_initialize {
                return Err(NodeError::Lifecycle("initialize refused".into()));
            }
            Ok(Arc::new(MemoryTransport::new(self.hub.clone())))
        }

        async fn register(&self, _node: &Arc<Node>) -> Result<(), NodeError> {
            if self.fail_register {
                return Err(NodeError::Lifecycle("register refused".into()));
            }
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn node_with(config: CoreConfig, lifecycle: StubLifecycle) -> Arc<Node> {
        Node::new(config, Arc::new(lifecycle))
    }

    fn plain_node(address: &str, hub: &MemoryHub) -> Arc<Node> {
        node_with(
            CoreConfig {
                address: Address::new(address),
                ..CoreConfig::default()
            },
            StubLifecycle::new(hub.clone()),
        )
    }

    #[tokio::test]
    async fn test_start_transitions_to_running() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        assert_eq!(node.state(), NodeState::Stopped);
        node.start().await;
        assert_eq!(node.state(), NodeState::Running);
        assert!(!node.has_errors());
    }

    #[tokio::test]
    async fn test_start_is_noop_unless_stopped() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        node.start().await;
        assert_eq!(node.state(), NodeState::Running);
        // Second start changes nothing and raises nothing.
        node.start().await;
        assert_eq!(node.state(), NodeState::Running);
        assert!(!node.has_errors());
    }

    #[tokio::test]
    async fn test_initialize_failure_lands_in_error() {
        let hub = MemoryHub::new();
        let mut lifecycle = StubLifecycle::new(hub.clone());
        lifecycle.fail_initialize = true;
        let node = node_with(CoreConfig::default(), lifecycle);
        node.start().await;
        assert_eq!(node.state(), NodeState::Error);
        assert!(node.errors()[0].contains("initialize refused"));
        // Error is terminal: start from Error is a no-op.
        node.start().await;
        assert_eq!(node.state(), NodeState::Error);
    }

    #[tokio::test]
    async fn test_register_failure_lands_in_error() {
        let hub = MemoryHub::new();
        let mut lifecycle = StubLifecycle::new(hub.clone());
        lifecycle.fail_register = true;
        let node = node_with(CoreConfig::default(), lifecycle);
        node.start().await;
        assert_eq!(node.state(), NodeState::Error);
        assert!(node.errors()[0].contains("register refused"));
    }

    #[tokio::test]
    async fn test_running_requires_tools_and_registration_done() {
        let hub = MemoryHub::new();
        let parent = plain_node("o://node", &hub);
        parent.add_tool(plain_node("o://a", &hub)).unwrap();
        parent.add_tool(plain_node("o://b", &hub)).unwrap();

        parent.start().await;
        assert_eq!(parent.state(), NodeState::Running);
        for tool in parent.tools() {
            assert_eq!(tool.state(), NodeState::Running);
        }
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_block_siblings_or_parent() {
        let hub = MemoryHub::new();
        let parent = plain_node("o://node", &hub);

        let mut bad = StubLifecycle::new(hub.clone());
        bad.fail_initialize = true;
        parent
            .add_tool(node_with(
                CoreConfig {
                    address: Address::new("o://bad"),
                    ..CoreConfig::default()
                },
                bad,
            ))
            .unwrap();
        parent.add_tool(plain_node("o://good", &hub)).unwrap();

        parent.start().await;
        assert_eq!(parent.state(), NodeState::Running);

        let bad_tool = parent.get_tool(&Address::new("o://bad")).unwrap();
        let good_tool = parent.get_tool(&Address::new("o://good")).unwrap();
        assert_eq!(bad_tool.state(), NodeState::Error);
        assert_eq!(good_tool.state(), NodeState::Running);
    }

    #[tokio::test]
    async fn test_stop_round_trip() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        node.add_tool(plain_node("o://calc", &hub)).unwrap();

        node.start().await;
        assert_eq!(node.state(), NodeState::Running);

        node.stop().await;
        assert_eq!(node.state(), NodeState::Stopped);
        for tool in node.tools() {
            assert_eq!(tool.state(), NodeState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_add_tool_rejects_duplicates() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        node.add_tool(plain_node("o://calc", &hub)).unwrap();
        let err = node.add_tool(plain_node("o://calc", &hub)).unwrap_err();
        assert!(matches!(err, NodeError::DuplicateTool(a) if a == "o://calc"));
    }

    #[tokio::test]
    async fn test_get_tool_and_tool_address() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        node.add_tool(plain_node("o://calc", &hub)).unwrap();

        let tool = node.get_tool(&Address::new("o://calc")).unwrap();
        assert_eq!(tool.address().value(), "o://calc");

        assert_eq!(
            node.tool_address(&Address::new("o://calc")),
            Address::new("o://node/calc")
        );

        let err = node.get_tool(&Address::new("o://missing")).unwrap_err();
        assert!(matches!(err, NodeError::ToolNotFound(a) if a == "o://node/missing"));
    }

    #[tokio::test]
    async fn test_invoke_before_start_fails() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        let err = node
            .invoke(&Address::new("o://other"), RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_state_change_events() {
        let hub = MemoryHub::new();
        let node = plain_node("o://node", &hub);
        let mut rx = node.subscribe();
        node.start().await;

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let NodeEvent::StateChanged { from, to, .. } = event {
                seen.push((from, to));
            }
        }
        assert_eq!(
            seen,
            vec![
                (NodeState::Stopped, NodeState::Starting),
                (NodeState::Starting, NodeState::Running),
            ]
        );
    }

    #[test]
    fn test_seeded_identity_is_stable() {
        let hub = MemoryHub::new();
        let make = || {
            node_with(
                CoreConfig {
                    seed: Some("phrase".into()),
                    ..CoreConfig::default()
                },
                StubLifecycle::new(hub.clone()),
            )
        };
        assert_eq!(make().peer_id(), make().peer_id());
    }
}
