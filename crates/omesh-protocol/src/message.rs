//! Wire envelope types.
//!
//! omesh traffic is JSON-RPC shaped: one serialized [`Request`] per stream,
//! answered by one serialized [`Response`]. The stream itself delimits the
//! message (write, half-close, read to end), so no length header is framed
//! into the payload.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The JSON-RPC version stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A protocol method.
///
/// Known methods get a variant; anything else is carried verbatim in
/// [`Method::Other`] rather than being rejected, so newer peers can introduce
/// methods without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    /// The mandatory first exchange on a connection.
    Handshake,
    /// A routed application payload.
    Route,
    /// A method this peer does not know about.
    Other(String),
}

impl Method {
    /// The wire form of the method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Handshake => "handshake",
            Method::Route => "route",
            Method::Other(s) => s,
        }
    }
}

impl From<String> for Method {
    fn from(s: String) -> Self {
        match s.as_str() {
            "handshake" => Method::Handshake,
            "route" => Method::Route,
            _ => Method::Other(s),
        }
    }
}

impl From<Method> for String {
    fn from(m: Method) -> Self {
        m.as_str().to_string()
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request parameters.
///
/// Every request carries the sending connection's id under `_connectionId`;
/// the handshake additionally carries the target address. Application
/// payloads flatten into the open map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    /// Id of the connection that produced this request.
    #[serde(rename = "_connectionId", default, skip_serializing_if = "String::is_empty")]
    pub connection_id: String,
    /// Target address, present on handshake requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Application payload.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RequestParams {
    /// Build params from an application payload map.
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }
}

/// A request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Monotonic per-connection counter value; unique per connection
    /// instance, not globally.
    pub id: u64,
    /// The protocol method.
    pub method: Method,
    /// Request parameters.
    pub params: RequestParams,
}

impl Request {
    /// Create a request stamped with the current protocol version.
    pub fn new(id: u64, method: Method, params: RequestParams) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        }
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::Serialize)
    }

    /// Parse one request from accumulated stream bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Request, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyResponse);
        }
        serde_json::from_slice(bytes).map_err(ProtocolError::MalformedRequest)
    }
}

/// A remote-declared prerequisite.
///
/// A handshake response may declare that the tool, to function, requires
/// another address to have been invoked with specific parameters first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Logical address that must be invoked.
    pub address: String,
    /// Optional version constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Parameters the prerequisite must be invoked with.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Dependency {
    /// Declare a dependency on an address with no parameters.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            version: None,
            parameters: Map::new(),
        }
    }
}

/// The result half of a response.
///
/// Known fields are typed; everything else lands in the open map instead of
/// being rejected, so unknown result shapes round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseResult {
    /// Echo of the method that triggered this response.
    #[serde(rename = "_requestMethod", default, skip_serializing_if = "Option::is_none")]
    pub request_method: Option<Method>,
    /// Optional result discriminator.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Dependencies declared by a handshake response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    /// Parameters advertised by a handshake response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseResult {
    /// A result carrying an error description.
    pub fn error(message: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("message".into(), Value::String(message.into()));
        Self {
            kind: Some("error".into()),
            extra,
            ..Self::default()
        }
    }

    /// True if the result carries an error discriminator.
    pub fn is_error(&self) -> bool {
        self.kind.as_deref() == Some("error")
    }
}

/// A response envelope, correlated to its request by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Id of the request this answers.
    pub id: u64,
    /// The result.
    pub result: ResponseResult,
}

impl Response {
    /// Create a response for the given request id.
    pub fn new(id: u64, result: ResponseResult) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }

    /// Serialize to bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::Serialize)
    }

    /// Parse one response from accumulated stream bytes.
    ///
    /// Zero bytes is a distinct failure ([`ProtocolError::EmptyResponse`])
    /// from a parse error ([`ProtocolError::MalformedResponse`]).
    pub fn from_bytes(bytes: &[u8]) -> Result<Response, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyResponse);
        }
        serde_json::from_slice(bytes).map_err(ProtocolError::MalformedResponse)
    }
}
