//! Server transport boundary.
//!
//! Capability traits for the connection manager and group session, a registry
//! of named connections, and a mock server for tests and offline runs.

pub mod capabilities;
pub mod mock;
pub mod registry;

pub use capabilities::{
    ConnectionManager, ConnectionStatus, GroupSession, ItemDefinition, ItemManager, ItemResult,
    SyncIo,
};
pub use mock::{MockFailure, MockServer};
pub use registry::ServerRegistry;
