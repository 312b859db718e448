//! # OPC DA Write Coordinator
//!
//! This crate writes values to an OPC DA server through a single group per
//! coordinator. Items are registered with the server the first time they are
//! written, their server handles are cached for the life of the group session,
//! and every request becomes one batched synchronous write.
//!
//! ## Crate Structure
//!
//! - **`coordinator`**: The `WriteCoordinator`, which owns the group session,
//!   serializes writes and reports results, warnings and errors.
//! - **`cache`**: `HandleCache`, mapping item identifiers to server handles.
//! - **`item`**: Write request types and value encoding by declared type.
//! - **`status`**: The observable coordinator status and its severity tiers.
//! - **`codes`**: Translation of OPC status codes into readable messages.
//! - **`transport`**: Capability traits the coordinator consumes from the
//!   protocol transport, a registry of named connections, and a mock server.
//! - **`config`**: Figment-based configuration loading.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide `WriteError` type.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use opcda_write::coordinator::WriteCoordinator;
//! use opcda_write::item::{DeclaredType, WriteItem, WriteRequest};
//! use opcda_write::transport::MockServer;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), opcda_write::error::WriteError> {
//! let server = MockServer::connected();
//! let coordinator = WriteCoordinator::new("line1", Some(Arc::new(server)));
//! coordinator.init().await?;
//!
//! let request = WriteRequest::new(vec![WriteItem::new("tag1", 42, DeclaredType::Integer)]);
//! assert!(coordinator.write(&request).await.is_success());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod codes;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod item;
pub mod logging;
pub mod status;
pub mod transport;

pub use coordinator::{CoordinatorEvent, WriteCoordinator, WriteOutcome, WriteResult};
pub use error::{AppResult, WriteError};
