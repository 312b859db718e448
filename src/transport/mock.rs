//! Mock Server Implementation
//!
//! Simulated OPC DA server for testing without a real DCOM endpoint.
//!
//! `MockServer` implements [`ConnectionManager`] and hands out groups whose
//! item managers and sync IO record every call. Behaviour can be scripted:
//!
//! - reject specific item IDs with a status code on registration
//! - fail group creation, registration calls or interface release
//! - answer registration with one result too few
//! - fail batched writes with a status code or a plain message
//! - hold writes until released, to exercise in-flight behaviour
//!
//! Server handles are assigned sequentially starting at 1000.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::codes::StatusCode;
use crate::item::{ItemId, WriteObject};
use crate::transport::capabilities::{
    ConnectionManager, ConnectionStatus, GroupSession, ItemDefinition, ItemManager, ItemResult,
    SyncIo,
};

const FIRST_SERVER_HANDLE: u32 = 1000;

/// Scripted failure for a mock call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Fail with a protocol status code.
    Status(u32),
    /// Fail with a plain error message.
    Message(String),
}

impl MockFailure {
    fn to_error(&self) -> anyhow::Error {
        match self {
            MockFailure::Status(code) => anyhow::Error::new(StatusCode(*code)),
            MockFailure::Message(msg) => anyhow!(msg.clone()),
        }
    }
}

#[derive(Debug)]
struct MockState {
    connected: AtomicBool,
    busy: AtomicBool,
    reconnect_requests: AtomicUsize,
    next_server_handle: AtomicU32,
    status_tx: watch::Sender<ConnectionStatus>,
    rejected_items: Mutex<HashMap<ItemId, u32>>,
    group_failure: Mutex<Option<MockFailure>>,
    add_failure: Mutex<Option<MockFailure>>,
    short_adds: AtomicBool,
    write_failure: Mutex<Option<MockFailure>>,
    end_failure: Mutex<Option<MockFailure>>,
    groups_opened: Mutex<Vec<String>>,
    add_calls: Mutex<Vec<Vec<ItemDefinition>>>,
    write_calls: Mutex<Vec<Vec<WriteObject>>>,
    ended: Mutex<Vec<&'static str>>,
    writes_held: watch::Sender<bool>,
    writes_entered: watch::Sender<usize>,
}

impl MockState {
    async fn end(&self, interface: &'static str) -> Result<()> {
        self.ended.lock().await.push(interface);
        match self.end_failure.lock().await.as_ref() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

/// Mock OPC DA server connection.
///
/// Cloning shares state, so a test can keep a handle for inspection while the
/// coordinator owns another.
///
/// # Example
///
/// ```rust,ignore
/// let server = MockServer::connected();
/// server.reject_item("badTag", 0xC004_0008).await;
/// ```
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Arc<MockState>,
}

impl MockServer {
    /// Create a disconnected mock server.
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (writes_held, _) = watch::channel(false);
        let (writes_entered, _) = watch::channel(0);
        Self {
            state: Arc::new(MockState {
                connected: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                reconnect_requests: AtomicUsize::new(0),
                next_server_handle: AtomicU32::new(FIRST_SERVER_HANDLE),
                status_tx,
                rejected_items: Mutex::new(HashMap::new()),
                group_failure: Mutex::new(None),
                add_failure: Mutex::new(None),
                short_adds: AtomicBool::new(false),
                write_failure: Mutex::new(None),
                end_failure: Mutex::new(None),
                groups_opened: Mutex::new(Vec::new()),
                add_calls: Mutex::new(Vec::new()),
                write_calls: Mutex::new(Vec::new()),
                ended: Mutex::new(Vec::new()),
                writes_held,
                writes_entered,
            }),
        }
    }

    /// Create a mock server that is already connected.
    pub fn connected() -> Self {
        let server = Self::new();
        server.connect();
        server
    }

    /// Bring the connection up and notify subscribers.
    pub fn connect(&self) {
        self.state.connected.store(true, Ordering::SeqCst);
        self.state.status_tx.send_replace(ConnectionStatus::Connected);
    }

    /// Drop the connection and notify subscribers.
    pub fn disconnect(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.state
            .status_tx
            .send_replace(ConnectionStatus::Disconnected);
    }

    /// Publish a status without changing `is_connected`.
    pub fn announce(&self, status: ConnectionStatus) {
        self.state.status_tx.send_replace(status);
    }

    /// Reject registration of `item_id` with `status`.
    pub async fn reject_item(&self, item_id: impl Into<ItemId>, status: u32) {
        self.state
            .rejected_items
            .lock()
            .await
            .insert(item_id.into(), status);
    }

    /// Accept `item_id` again after [`reject_item`](Self::reject_item).
    pub async fn accept_item(&self, item_id: &ItemId) {
        self.state.rejected_items.lock().await.remove(item_id);
    }

    /// Make group creation fail.
    pub async fn fail_groups(&self, failure: Option<MockFailure>) {
        *self.state.group_failure.lock().await = failure;
    }

    /// Make registration (`add`) calls fail.
    pub async fn fail_adds(&self, failure: Option<MockFailure>) {
        *self.state.add_failure.lock().await = failure;
    }

    /// Answer registration calls with the last result missing.
    pub fn short_adds(&self, enabled: bool) {
        self.state.short_adds.store(enabled, Ordering::SeqCst);
    }

    /// Make `end` fail on the group, item manager and sync IO.
    pub async fn fail_ends(&self, failure: Option<MockFailure>) {
        *self.state.end_failure.lock().await = failure;
    }

    /// Make batched writes fail.
    pub async fn fail_writes(&self, failure: Option<MockFailure>) {
        *self.state.write_failure.lock().await = failure;
    }

    /// Hold writes inside the write call until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.state.writes_held.send_replace(true);
    }

    /// Let held writes complete.
    pub fn release_writes(&self) {
        self.state.writes_held.send_replace(false);
    }

    /// Wait until at least `count` write calls have been entered.
    pub async fn wait_for_writes_entered(&self, count: usize) {
        let mut rx = self.state.writes_entered.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|entered| *entered >= count).await;
    }

    /// Group IDs opened so far.
    pub async fn groups_opened(&self) -> Vec<String> {
        self.state.groups_opened.lock().await.clone()
    }

    /// Every `add` call, in order.
    pub async fn add_calls(&self) -> Vec<Vec<ItemDefinition>> {
        self.state.add_calls.lock().await.clone()
    }

    /// Every batched write, in order.
    pub async fn write_calls(&self) -> Vec<Vec<WriteObject>> {
        self.state.write_calls.lock().await.clone()
    }

    /// Interfaces released, in order (`"sync_io"`, `"item_manager"`, `"group"`).
    pub async fn ended(&self) -> Vec<&'static str> {
        self.state.ended.lock().await.clone()
    }

    /// Number of reconnect requests received.
    pub fn reconnect_requests(&self) -> usize {
        self.state.reconnect_requests.load(Ordering::SeqCst)
    }

    /// Whether a session open/close is flagged in progress.
    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionManager for MockServer {
    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn add_group(&self, group_id: &str) -> Result<Box<dyn GroupSession>> {
        if let Some(failure) = self.state.group_failure.lock().await.as_ref() {
            return Err(failure.to_error());
        }
        if !self.is_connected() {
            anyhow::bail!("MockServer: not connected");
        }
        debug!(group_id, "MockServer: group added");
        self.state
            .groups_opened
            .lock()
            .await
            .push(group_id.to_string());
        Ok(Box::new(MockGroup {
            state: Arc::clone(&self.state),
        }))
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.status_tx.subscribe()
    }

    fn reconnect(&self) {
        self.state.reconnect_requests.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            self.state.status_tx.send_replace(ConnectionStatus::Connecting);
            self.connect();
        }
    }

    fn set_busy(&self, busy: bool) {
        self.state.busy.store(busy, Ordering::SeqCst);
    }
}

struct MockGroup {
    state: Arc<MockState>,
}

#[async_trait]
impl GroupSession for MockGroup {
    async fn item_manager(&self) -> Result<Box<dyn ItemManager>> {
        Ok(Box::new(MockItemManager {
            state: Arc::clone(&self.state),
        }))
    }

    async fn sync_io(&self) -> Result<Box<dyn SyncIo>> {
        Ok(Box::new(MockSyncIo {
            state: Arc::clone(&self.state),
        }))
    }

    async fn end(&self) -> Result<()> {
        self.state.end("group").await
    }
}

struct MockItemManager {
    state: Arc<MockState>,
}

#[async_trait]
impl ItemManager for MockItemManager {
    async fn add(&self, items: &[ItemDefinition]) -> Result<Vec<ItemResult>> {
        self.state.add_calls.lock().await.push(items.to_vec());
        if let Some(failure) = self.state.add_failure.lock().await.as_ref() {
            return Err(failure.to_error());
        }
        let rejected = self.state.rejected_items.lock().await;
        let mut results: Vec<ItemResult> = items
            .iter()
            .map(|item| match rejected.get(&item.item_id) {
                Some(&status) => ItemResult::rejected(status),
                None => ItemResult::ok(
                    self.state
                        .next_server_handle
                        .fetch_add(1, Ordering::SeqCst),
                ),
            })
            .collect();
        if self.state.short_adds.load(Ordering::SeqCst) {
            results.pop();
        }
        Ok(results)
    }

    async fn end(&self) -> Result<()> {
        self.state.end("item_manager").await
    }
}

struct MockSyncIo {
    state: Arc<MockState>,
}

#[async_trait]
impl SyncIo for MockSyncIo {
    async fn write(&self, objects: &[WriteObject]) -> Result<()> {
        self.state.writes_entered.send_modify(|entered| *entered += 1);

        let mut held = self.state.writes_held.subscribe();
        // The sender lives in `state`, which this IO keeps alive.
        let _ = held.wait_for(|held| !*held).await;

        self.state.write_calls.lock().await.push(objects.to_vec());
        if let Some(failure) = self.state.write_failure.lock().await.as_ref() {
            return Err(failure.to_error());
        }
        debug!(count = objects.len(), "MockServer: batch written");
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        self.state.end("sync_io").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{DeclaredType, WriteItem};

    fn definition(id: &str, client_handle: u32) -> ItemDefinition {
        ItemDefinition {
            item_id: ItemId::new(id),
            client_handle,
        }
    }

    #[tokio::test]
    async fn assigns_sequential_server_handles() {
        let server = MockServer::connected();
        let group = server.add_group("g1").await.unwrap();
        let items = group.item_manager().await.unwrap();

        let results = items
            .add(&[definition("a", 1), definition("b", 2)])
            .await
            .unwrap();
        assert_eq!(results, vec![ItemResult::ok(1000), ItemResult::ok(1001)]);
        assert_eq!(server.groups_opened().await, vec!["g1".to_string()]);
    }

    #[tokio::test]
    async fn rejects_scripted_items() {
        let server = MockServer::connected();
        server.reject_item("bad", 0xC004_0007).await;
        let group = server.add_group("g1").await.unwrap();
        let items = group.item_manager().await.unwrap();

        let results = items.add(&[definition("bad", 1)]).await.unwrap();
        assert_eq!(results, vec![ItemResult::rejected(0xC004_0007)]);
    }

    #[tokio::test]
    async fn group_creation_requires_connection() {
        let server = MockServer::new();
        assert!(server.add_group("g1").await.is_err());
    }

    #[tokio::test]
    async fn reconnect_brings_connection_up() {
        let server = MockServer::new();
        let rx = server.subscribe();
        server.reconnect();
        assert!(server.is_connected());
        assert_eq!(*rx.borrow(), ConnectionStatus::Connected);
        assert_eq!(server.reconnect_requests(), 1);
    }

    #[tokio::test]
    async fn scripted_add_failure_and_short_results() {
        let server = MockServer::connected();
        let group = server.add_group("g1").await.unwrap();
        let items = group.item_manager().await.unwrap();

        server.short_adds(true);
        let results = items
            .add(&[definition("a", 1), definition("b", 2)])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        server
            .fail_adds(Some(MockFailure::Status(0xC004_0007)))
            .await;
        let err = items.add(&[definition("c", 3)]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<StatusCode>(), Some(&StatusCode(0xC004_0007)));
        assert_eq!(server.add_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn scripted_end_failure_is_still_recorded() {
        let server = MockServer::connected();
        server
            .fail_ends(Some(MockFailure::Message("rpc failed".into())))
            .await;
        let group = server.add_group("g1").await.unwrap();

        let err = group.end().await.unwrap_err();
        assert_eq!(err.to_string(), "rpc failed");
        assert_eq!(server.ended().await, vec!["group"]);
    }

    #[tokio::test]
    async fn scripted_write_failure_carries_status() {
        let server = MockServer::connected();
        server.fail_writes(Some(MockFailure::Status(0xC004_000B))).await;
        let group = server.add_group("g1").await.unwrap();
        let io = group.sync_io().await.unwrap();

        let err = io
            .write(&[WriteItem::new("a", 1, DeclaredType::Integer).encode(1000)])
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<StatusCode>(), Some(&StatusCode(0xC004_000B)));
        assert_eq!(server.write_calls().await.len(), 1);
    }
}
