//! Server Capabilities
//!
//! Traits the write coordinator consumes from the protocol transport. The
//! transport itself (DCOM marshaling, authentication, reconnect policy) lives
//! behind these seams:
//!
//! - [`ConnectionManager`] - the named server connection; opens groups and
//!   reports connection status
//! - [`GroupSession`] - one server-side group
//! - [`ItemManager`] - registers items in a group
//! - [`SyncIo`] - synchronous batched writes
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//!
//! A transport reports a protocol status by failing with an `anyhow::Error`
//! that wraps a [`StatusCode`](crate::codes::StatusCode), so callers can
//! translate it without knowing the transport's error types.

use crate::item::{ClientHandle, ItemId, ServerHandle, WriteObject};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Connection state reported by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connection is down.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and able to open groups.
    Connected,
}

/// Item definition passed to [`ItemManager::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDefinition {
    /// Item to register.
    pub item_id: ItemId,
    /// Client-side handle chosen for this registration.
    pub client_handle: ClientHandle,
}

/// Per-item result of [`ItemManager::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemResult {
    /// Status code for this item; zero on success.
    pub status: u32,
    /// Server handle; only meaningful when `status` is zero.
    pub server_handle: ServerHandle,
}

impl ItemResult {
    /// Successful registration.
    pub fn ok(server_handle: ServerHandle) -> Self {
        Self {
            status: crate::codes::S_OK,
            server_handle,
        }
    }

    /// Rejected registration.
    pub fn rejected(status: u32) -> Self {
        Self {
            status,
            server_handle: 0,
        }
    }
}

/// Capability: Server Connection
///
/// The named connection a coordinator writes through. Owned by a separate
/// connection manager that handles connecting and reconnect policy.
///
/// # Contract
/// - `is_connected` is a cheap synchronous read
/// - `subscribe` returns a receiver whose current value is the present status
/// - `reconnect` only requests a retry; it does not wait for it
/// - `set_busy` marks a group session being opened or closed so the manager
///   does not tear the connection down underneath it
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Whether the server connection is currently up.
    fn is_connected(&self) -> bool;

    /// Open a new group on the server.
    async fn add_group(&self, group_id: &str) -> Result<Box<dyn GroupSession>>;

    /// Subscribe to connection status changes.
    fn subscribe(&self) -> watch::Receiver<ConnectionStatus>;

    /// Ask the manager to (re)connect.
    fn reconnect(&self);

    /// Flag a session open/close in progress.
    fn set_busy(&self, busy: bool);
}

/// Capability: Group Session
///
/// A server-side group. Item registration and writes go through the
/// sub-capabilities obtained from it.
#[async_trait]
pub trait GroupSession: Send + Sync {
    /// Item manager for this group.
    async fn item_manager(&self) -> Result<Box<dyn ItemManager>>;

    /// Synchronous IO for this group.
    async fn sync_io(&self) -> Result<Box<dyn SyncIo>>;

    /// Release the group on the server.
    async fn end(&self) -> Result<()>;
}

/// Capability: Item Registration
#[async_trait]
pub trait ItemManager: Send + Sync {
    /// Register items in the group.
    ///
    /// # Returns
    /// One [`ItemResult`] per definition, in the same order.
    async fn add(&self, items: &[ItemDefinition]) -> Result<Vec<ItemResult>>;

    /// Release the item manager.
    async fn end(&self) -> Result<()>;
}

/// Capability: Synchronous Write
#[async_trait]
pub trait SyncIo: Send + Sync {
    /// Write all objects in one call.
    ///
    /// # Returns
    /// - Ok(()) if the server accepted the batch
    /// - Err if the call failed or the server rejected it
    async fn write(&self, objects: &[WriteObject]) -> Result<()>;

    /// Release the sync IO interface.
    async fn end(&self) -> Result<()>;
}
