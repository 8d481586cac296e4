//! Typed node events.
//!
//! Instead of an open-ended listener registry, each node owns one broadcast
//! channel of [`NodeEvent`]s. Subscribers hold a receiver and release it by
//! dropping it; slow subscribers lose old events rather than blocking the
//! node.

use crate::node::NodeState;
use tokio::sync::broadcast;

/// Channel capacity; events beyond this are dropped for lagging subscribers.
const EVENT_CAPACITY: usize = 256;

/// Something observable that happened to a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The lifecycle state machine transitioned.
    StateChanged {
        /// The node's logical address.
        address: String,
        /// Previous state.
        from: NodeState,
        /// New state.
        to: NodeState,
    },
    /// The node completed its registration.
    Registered {
        /// The node's logical address.
        address: String,
        /// The node's peer id.
        peer_id: String,
    },
    /// A registration from another node was accepted.
    RegistrationAccepted {
        /// The registering node's logical address.
        address: String,
    },
    /// A child tool finished starting.
    ToolStarted {
        /// The tool's logical address.
        address: String,
    },
    /// A child tool failed during startup.
    ToolFailed {
        /// The tool's logical address.
        address: String,
    },
}

/// A node's event channel.
pub struct NodeEvents {
    sender: broadcast::Sender<NodeEvent>,
}

impl NodeEvents {
    /// Create the channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe; drop the receiver to release the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Nothing happens if no one is subscribed.
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for NodeEvents {
    fn default() -> Self {
        Self::new()
    }
}
