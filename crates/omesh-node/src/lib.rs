//! Concrete omesh node variants.
//!
//! [`service_node`] serves its address over TCP, [`virtual_node`] over an
//! in-process memory hub, and the leader variants keep the network's
//! [`NodeDirectory`] and accept registrations at `o://register`.

pub mod directory;
pub mod leader;
pub mod server;
pub mod service;
pub mod virtual_node;

pub use directory::{DirectoryEntry, EntryState, NodeDirectory};
pub use leader::{tcp_leader, virtual_leader, LeaderLifecycle};
pub use server::{NodeServer, RequestHandler, UnroutedHandler};
pub use service::{service_node, ServiceLifecycle};
pub use virtual_node::{virtual_node, VirtualLifecycle};
