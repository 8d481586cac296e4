//! Protocol-level error types.

use thiserror::Error;

/// Errors raised by the addressing scheme and envelope (de)serialization.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The address value does not start with the `o://` scheme.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A transport endpoint string could not be converted to an address.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Zero bytes were read where a response was expected.
    #[error("Empty response: zero bytes read from stream")]
    EmptyResponse,

    /// The response bytes were not a valid envelope.
    #[error("Malformed response: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    /// The request bytes were not a valid envelope.
    #[error("Malformed request: {0}")]
    MalformedRequest(#[source] serde_json::Error),

    /// An envelope could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}
