//! Hierarchical logical addressing.
//!
//! An [`Address`] is a logical name of the form `o://path[/path...]`. It is
//! distinct from the transport endpoints it resolves to: the address names a
//! node in the logical namespace, the endpoint list says where it can be
//! dialed. Child nodes ("tools") are reachable only through their parent's
//! namespace, produced by [`Address::encapsulate`].

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// The logical address scheme literal.
pub const SCHEME: &str = "o://";

/// Prefix of the stream protocol id derived from an address.
pub const PROTOCOL_PREFIX: &str = "/o/";

/// Reserved top-level path segment for the registration service.
pub const REGISTER_SEGMENT: &str = "register";

/// Reserved top-level path segment for the network leader.
pub const LEADER_SEGMENT: &str = "leader";

/// The registration service address.
pub const REGISTRATION_ADDRESS: &str = "o://register";

/// Registration address used by joining clients.
pub const REGISTRATION_CLIENT_ADDRESS: &str = "o://register/client";

/// The network leader address.
pub const LEADER_ADDRESS: &str = "o://leader";

/// Addresses that are resolved specially by routing collaborators and are
/// never dialed like ordinary tool addresses.
pub const RESTRICTED_ADDRESSES: &[&str] = &[
    REGISTRATION_ADDRESS,
    REGISTRATION_CLIENT_ADDRESS,
    LEADER_ADDRESS,
];

/// A hierarchical logical address.
///
/// The `value` is immutable once constructed; the endpoint list may be
/// populated later, after discovery or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    value: String,
    #[serde(default)]
    endpoints: Vec<String>,
}

impl Address {
    /// Create an address with no resolved endpoints.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            endpoints: Vec::new(),
        }
    }

    /// Create an address with pre-resolved transport endpoints.
    pub fn with_endpoints(value: impl Into<String>, endpoints: Vec<String>) -> Self {
        Self {
            value: value.into(),
            endpoints,
        }
    }

    /// The raw address value, stored verbatim.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// True iff the value starts with the `o://` scheme.
    ///
    /// Addresses that fail validation must never be dialed. Only the scheme
    /// prefix is checked; internal path characters are not validated.
    pub fn validate(&self) -> bool {
        self.value.starts_with(SCHEME)
    }

    /// The value with the scheme stripped.
    pub fn paths(&self) -> &str {
        self.value.strip_prefix(SCHEME).unwrap_or(&self.value)
    }

    /// The stream protocol id for this address (`o://a/b` → `/o/a/b`).
    pub fn protocol(&self) -> String {
        format!("{}{}", PROTOCOL_PREFIX, self.paths())
    }

    /// Transport endpoints resolved for this address.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Replace the resolved endpoint list.
    pub fn set_endpoints(&mut self, endpoints: Vec<String>) {
        self.endpoints = endpoints;
    }

    /// Append a resolved endpoint.
    pub fn add_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoints.push(endpoint.into());
    }

    /// Nest `child` under `parent`'s namespace.
    ///
    /// The result is a brand-new address whose value is
    /// `parent.value + "/" + child.paths()` with an empty endpoint list;
    /// neither input is mutated. Only the scheme is stripped from the child,
    /// never arbitrary prefixes.
    pub fn encapsulate(parent: &Address, child: &Address) -> Address {
        Address::new(format!("{}/{}", parent.value, child.paths()))
    }

    /// Convert to the transport library's endpoint string form.
    ///
    /// This and [`Address::from_endpoint`] are the one place the core touches
    /// the transport collaborator's addressing format.
    pub fn to_endpoint(&self) -> String {
        self.protocol()
    }

    /// Convert back from a transport endpoint string (`/o/a/b` → `o://a/b`).
    pub fn from_endpoint(endpoint: &str) -> Result<Address, ProtocolError> {
        let paths = endpoint
            .strip_prefix(PROTOCOL_PREFIX)
            .ok_or_else(|| ProtocolError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(Address::new(format!("{SCHEME}{paths}")))
    }

    /// True if this address names a reserved routing service.
    pub fn is_restricted(&self) -> bool {
        RESTRICTED_ADDRESSES.contains(&self.value.as_str())
            || matches!(
                self.paths().split('/').next(),
                Some(REGISTER_SEGMENT) | Some(LEADER_SEGMENT)
            )
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
