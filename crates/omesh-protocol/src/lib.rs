//! omesh wire protocol — logical addressing and the JSON-RPC envelope.
//!
//! Every omesh node is addressable by a hierarchical `o://` address. Nodes
//! talk to each other with JSON-RPC shaped request/response messages carried
//! over point-to-point byte streams. This crate defines the address scheme,
//! the envelope types, and their (de)serialization. It contains no I/O.

pub mod address;
pub mod error;
pub mod message;

pub use address::{Address, RESTRICTED_ADDRESSES};
pub use error::ProtocolError;
pub use message::{
    Dependency, Method, Request, RequestParams, Response, ResponseResult, JSONRPC_VERSION,
};
