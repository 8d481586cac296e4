//! omesh core — connections, the connection manager, and the node lifecycle.
//!
//! A [`Node`] owns a [`ConnectionManager`]; reaching a logical address goes
//! through [`Node::invoke`], which returns a cached or freshly dialed
//! [`Connection`], runs the mandatory handshake once per connection, resolves
//! any dependencies the remote declared, and only then transmits the payload.

pub mod connection;
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod manager;
pub mod node;
pub mod record;

pub use connection::Connection;
pub use error::NodeError;
pub use events::{NodeEvent, NodeEvents};
pub use identity::NodeIdentity;
pub use lifecycle::NodeLifecycle;
pub use manager::ConnectionManager;
pub use node::{CoreConfig, Node, NodeState, NodeType};
