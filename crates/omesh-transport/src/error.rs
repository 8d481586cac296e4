//! Transport-boundary errors.

use thiserror::Error;

/// Errors from the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No endpoint could be reached. Not retried at this layer.
    #[error("Dial failed: no reachable endpoint among {tried}")]
    DialFailure {
        /// How many endpoints were attempted.
        tried: usize,
    },

    /// Dialing was requested with an empty endpoint list.
    #[error("No endpoints to dial")]
    NoEndpoints,

    /// The connection was closed, locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,
}
