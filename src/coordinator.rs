//! Write coordinator for one OPC DA group.
//!
//! The coordinator owns a single group session on a named server connection.
//! For every write request it registers items it has not seen before, encodes
//! each value by its declared type and issues one batched synchronous write
//! using the cached server handles.
//!
//! # Lifecycle
//!
//! ```text
//!   start() ──► manager status ──► Connected ──► init() ──► Ready
//!                              └──► Connecting / Disconnected
//!   write() : Ready ──► Writing ──► Ready | Error
//!   close() : releases sync IO, item manager and group, clears the cache
//! ```
//!
//! # Concurrency
//!
//! Writes are strictly serialized. A request that arrives while another write
//! is in flight, or while `init`/`close` is replacing the session, is dropped,
//! not queued; callers that need delivery resend. The session sits behind an
//! async mutex so `init`/`close` wait for an in-flight write instead of tearing
//! the group down under it. Readers of the session only delay a write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{HandleCache, RegistrationOutcome};
use crate::config::NodeConfig;
use crate::error::{AppResult, WriteError};
use crate::item::{ItemId, ServerHandle, WriteRequest};
use crate::status::{CoordinatorStatus, StatusMonitor};
use crate::transport::{
    ConnectionManager, ConnectionStatus, GroupSession, ItemManager, ServerRegistry, SyncIo,
};

const EVENT_CAPACITY: usize = 64;

/// Notification emitted by a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CoordinatorEvent {
    /// A request was processed.
    Result {
        /// Whether the batched write succeeded.
        success: bool,
    },
    /// An item could not be registered and was left out of the write.
    Warning {
        /// Rejected item.
        item: ItemId,
        /// Translated reason.
        message: String,
    },
    /// A request or session operation failed.
    Error {
        /// Translated reason.
        message: String,
    },
}

/// An item left out of a write because the server refused to register it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedItem {
    /// Item identifier.
    pub item_id: ItemId,
    /// Status code returned on registration.
    pub code: u32,
    /// Translated message.
    pub message: String,
}

/// Result of a processed write request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    /// Whether the batched write succeeded.
    pub success: bool,
    /// Items included in the batched write, in request order.
    pub written: Vec<ItemId>,
    /// Items excluded because registration failed.
    pub rejected: Vec<RejectedItem>,
    /// Translated error for a failed request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a request was dropped without being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No server connection was configured.
    Unconfigured,
    /// The server connection is down.
    NotConnected,
    /// No group session is open.
    SessionNotOpen,
    /// The session is being opened or closed.
    SessionBusy,
    /// Another write is in flight.
    Busy,
}

/// What happened to a write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The request was processed.
    Completed(WriteResult),
    /// The request was dropped; nothing was emitted.
    Dropped(DropReason),
}

impl WriteOutcome {
    /// The result, if the request was processed.
    pub fn result(&self) -> Option<&WriteResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Dropped(_) => None,
        }
    }

    /// Whether the request was processed and the write succeeded.
    pub fn is_success(&self) -> bool {
        self.result().is_some_and(|r| r.success)
    }
}

struct OpenSession {
    group: Box<dyn GroupSession>,
    item_manager: Box<dyn ItemManager>,
    sync_io: Box<dyn SyncIo>,
    cache: HandleCache,
}

/// Clears the in-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Holds the connection manager's busy flag, and the coordinator's own
/// transition flag, while a session opens or closes.
struct ManagerBusy<'a> {
    server: &'a dyn ConnectionManager,
    transitioning: &'a AtomicBool,
}

impl<'a> ManagerBusy<'a> {
    fn set(server: &'a dyn ConnectionManager, transitioning: &'a AtomicBool) -> Self {
        transitioning.store(true, Ordering::Release);
        server.set_busy(true);
        Self {
            server,
            transitioning,
        }
    }
}

impl Drop for ManagerBusy<'_> {
    fn drop(&mut self) {
        self.server.set_busy(false);
        self.transitioning.store(false, Ordering::Release);
    }
}

/// Coordinates registration and batched writes for one group.
pub struct WriteCoordinator {
    group_id: String,
    server: Option<Arc<dyn ConnectionManager>>,
    session: Mutex<Option<OpenSession>>,
    writing: AtomicBool,
    transitioning: AtomicBool,
    status: StatusMonitor,
    events: broadcast::Sender<CoordinatorEvent>,
    shutdown: watch::Sender<bool>,
}

impl WriteCoordinator {
    /// Create a coordinator for `group_id` on `server`.
    ///
    /// Without a server the coordinator is unusable: its status is fixed at
    /// `error` and every write is dropped.
    pub fn new(group_id: impl Into<String>, server: Option<Arc<dyn ConnectionManager>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let status = StatusMonitor::default();
        if server.is_none() {
            error!("{}", WriteError::NoServer);
            status.set(CoordinatorStatus::Error);
        }
        Self {
            group_id: group_id.into(),
            server,
            session: Mutex::new(None),
            writing: AtomicBool::new(false),
            transitioning: AtomicBool::new(false),
            status,
            events,
            shutdown,
        }
    }

    /// Create a coordinator from node configuration, resolving the server by name.
    pub fn from_config(config: &NodeConfig, servers: &ServerRegistry) -> Self {
        let server = match config.server.trim() {
            "" => None,
            name => {
                let server = servers.get(name);
                if server.is_none() {
                    warn!(server = name, "unknown server connection");
                }
                server
            }
        };
        Self::new(config.group_id.clone(), server)
    }

    /// Group name this coordinator opens.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Current status.
    pub fn status(&self) -> CoordinatorStatus {
        self.status.get()
    }

    /// Status holder, for display or supervision.
    pub fn status_monitor(&self) -> &StatusMonitor {
        &self.status
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.subscribe()
    }

    /// Subscribe to results, warnings and errors.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Whether a write is in flight.
    pub fn is_writing(&self) -> bool {
        self.writing.load(Ordering::Acquire)
    }

    /// Whether a group session is open.
    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Cached server handle for `item_id` in the open session.
    pub async fn cached_handle(&self, item_id: &ItemId) -> Option<ServerHandle> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|session| session.cache.lookup(item_id))
    }

    /// Number of items registered in the open session.
    pub async fn cached_items(&self) -> usize {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(0, |session| session.cache.len())
    }

    /// Register with the connection manager and follow its status.
    ///
    /// Requests a (re)connect, then handles every status change in order on a
    /// background task until [`close`](Self::close) is called. Returns `None`
    /// when no server is configured.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let server = self.server.clone()?;
        let mut status_rx = server.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();
        server.reconnect();

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow_and_update() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                this.server_status_changed(status).await;

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            debug!(group = %this.group_id, "connection manager went away");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Handle a connection status change from the connection manager.
    pub async fn server_status_changed(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Disconnected => self.status.set(CoordinatorStatus::Disconnected),
            ConnectionStatus::Connecting => self.status.set(CoordinatorStatus::Connecting),
            ConnectionStatus::Connected => {
                // Failures are already reported and a reconnect requested.
                let _ = self.init().await;
            }
        }
    }

    /// Open the group session, replacing any previous one.
    ///
    /// The previous session and its handle cache are released first. On
    /// failure the status becomes `error` and a reconnect is requested.
    #[instrument(skip_all, fields(group = %self.group_id))]
    pub async fn init(&self) -> AppResult<()> {
        let server = self.server.as_deref().ok_or(WriteError::NoServer)?;
        let _busy = ManagerBusy::set(server, &self.transitioning);
        let mut slot = self.session.lock().await;

        if let Some(previous) = slot.take() {
            if let Err(err) = release(previous).await {
                warn!(error = %err.diagnostic(), "failed to release previous group session");
            }
        }

        match open_session(server, &self.group_id).await {
            Ok(session) => {
                *slot = Some(session);
                info!("group session open");
                self.status.set(CoordinatorStatus::Ready);
                Ok(())
            }
            Err(err) => {
                self.status.set(CoordinatorStatus::Error);
                self.report(&err);
                server.reconnect();
                Err(err)
            }
        }
    }

    /// Release the group session and stop following the connection manager.
    #[instrument(skip_all, fields(group = %self.group_id))]
    pub async fn close(&self) -> AppResult<()> {
        self.shutdown.send_replace(true);
        let Some(server) = self.server.as_deref() else {
            return Ok(());
        };
        let _busy = ManagerBusy::set(server, &self.transitioning);

        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        if let Err(err) = release(session).await {
            self.status.set(CoordinatorStatus::Error);
            self.report(&err);
            return Err(err);
        }
        info!("group session closed");
        Ok(())
    }

    /// Write a request.
    ///
    /// Dropped without effect if no server is configured, the connection is
    /// down, no session is open, or another write is in flight. Otherwise
    /// the request is processed and exactly one [`CoordinatorEvent::Result`]
    /// is emitted.
    #[instrument(skip_all, fields(group = %self.group_id, items = request.len()))]
    pub async fn write(&self, request: &WriteRequest) -> WriteOutcome {
        let Some(server) = self.server.as_deref() else {
            return WriteOutcome::Dropped(DropReason::Unconfigured);
        };
        if !server.is_connected() {
            debug!("dropping write: not connected");
            return WriteOutcome::Dropped(DropReason::NotConnected);
        }
        let Some(_in_flight) = InFlight::acquire(&self.writing) else {
            debug!("dropping write: another write is in flight");
            return WriteOutcome::Dropped(DropReason::Busy);
        };
        if self.transitioning.load(Ordering::Acquire) {
            debug!("dropping write: session is being opened or closed");
            return WriteOutcome::Dropped(DropReason::SessionBusy);
        }
        let mut slot = self.session.lock().await;
        let Some(session) = slot.as_mut() else {
            debug!("dropping write: no open session");
            return WriteOutcome::Dropped(DropReason::SessionNotOpen);
        };

        self.status.set(CoordinatorStatus::Writing);
        let mut result = WriteResult::default();
        match self.write_batch(session, request, &mut result).await {
            Ok(()) => {
                result.success = true;
                self.status.set(CoordinatorStatus::Ready);
                info!(
                    written = result.written.len(),
                    rejected = result.rejected.len(),
                    "write complete"
                );
            }
            Err(err) => {
                result.success = false;
                result.written.clear();
                result.error = Some(err.diagnostic());
                self.status.set(CoordinatorStatus::Error);
                self.report(&err);
            }
        }

        self.emit(CoordinatorEvent::Result {
            success: result.success,
        });
        WriteOutcome::Completed(result)
    }

    async fn write_batch(
        &self,
        session: &mut OpenSession,
        request: &WriteRequest,
        result: &mut WriteResult,
    ) -> AppResult<()> {
        let outcomes = session
            .cache
            .ensure_registered(request.item_ids(), session.item_manager.as_ref())
            .await?;

        for item_id in request.item_ids() {
            if let Some(RegistrationOutcome::Rejected { code, message }) = outcomes.get(item_id) {
                if result.rejected.iter().any(|r| &r.item_id == item_id) {
                    continue;
                }
                warn!(item = %item_id, code = *code, "Error adding item '{item_id}': {message}");
                self.emit(CoordinatorEvent::Warning {
                    item: item_id.clone(),
                    message: format!("Error adding item '{item_id}': {message}"),
                });
                result.rejected.push(RejectedItem {
                    item_id: item_id.clone(),
                    code: *code,
                    message: message.clone(),
                });
            }
        }

        let mut objects = Vec::with_capacity(request.len());
        for item in request.items() {
            if let Some(handle) = session.cache.lookup(&item.item_id) {
                objects.push(item.encode(handle));
                result.written.push(item.item_id.clone());
            }
        }

        if objects.is_empty() {
            debug!("no registered items to write");
            return Ok(());
        }

        session.sync_io.write(&objects).await?;
        Ok(())
    }

    fn report(&self, err: &WriteError) {
        let message = err.diagnostic();
        error!(error = ?err, "{message}");
        self.emit(CoordinatorEvent::Error { message });
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("group_id", &self.group_id)
            .field("configured", &self.server.is_some())
            .field("status", &self.status.get())
            .field("writing", &self.is_writing())
            .finish()
    }
}

async fn open_session(server: &dyn ConnectionManager, group_id: &str) -> AppResult<OpenSession> {
    let group = server.add_group(group_id).await?;

    let interfaces = async {
        let item_manager = group.item_manager().await?;
        let sync_io = group.sync_io().await?;
        anyhow::Ok((item_manager, sync_io))
    }
    .await;

    match interfaces {
        Ok((item_manager, sync_io)) => Ok(OpenSession {
            group,
            item_manager,
            sync_io,
            cache: HandleCache::new(),
        }),
        Err(err) => {
            if let Err(end_err) = group.end().await {
                debug!(error = %end_err, "failed to end half-open group");
            }
            Err(err.into())
        }
    }
}

/// Ends every interface even if an earlier one fails; the first failure is returned.
async fn release(mut session: OpenSession) -> AppResult<()> {
    session.cache.clear();
    let results = [
        session.sync_io.end().await,
        session.item_manager.end().await,
        session.group.end().await,
    ];
    for result in results {
        result?;
    }
    Ok(())
}
