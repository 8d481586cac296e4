//! Node-level error taxonomy.

use omesh_protocol::ProtocolError;
use omesh_transport::TransportError;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by connections, the connection manager, and nodes.
///
/// Lifecycle failures (`initialize`/`register`/`teardown`) are *not*
/// propagated out of `start()`/`stop()`; they are recorded on the node and
/// drive its state machine to `Error`. Everything else is returned to the
/// caller.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The address value fails the scheme check. Never silently coerced.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A tool with the same address is already registered on this node.
    #[error("Tool already exists: {0}")]
    DuplicateTool(String),

    /// No tool with this address exists on this node.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The underlying transport connection is no longer open. Treated by
    /// the connection manager as an eviction signal, not a fatal error.
    #[error("Connection is not valid")]
    ConnectionInvalid,

    /// The connection was explicitly closed and cannot be used again.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The memoized handshake outcome was a failure; all callers of this
    /// connection observe the same result.
    #[error("Handshake failed: {0}")]
    Handshake(Arc<NodeError>),

    /// Resolving a remote-declared dependency failed, aborting the send.
    #[error("Dependency {address} failed: {source}")]
    DependencyFailed {
        /// The dependency's logical address.
        address: String,
        /// Why its resolution failed.
        #[source]
        source: Box<NodeError>,
    },

    /// A dial or transmit exceeded the configured deadline.
    #[error("Request to {address} timed out after {seconds}s")]
    Timeout {
        /// The target address.
        address: String,
        /// The deadline that elapsed.
        seconds: u64,
    },

    /// The node has not been started; no connection manager exists yet.
    #[error("Node {0} is not running")]
    NotRunning(String),

    /// A lifecycle hook failed.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Protocol-framing violation (empty or malformed envelope, bad address).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport-boundary failure (dial failure, dead connection, I/O).
    #[error(transparent)]
    Transport(#[from] TransportError),
}
