//! Coordinator status tracking.
//!
//! The coordinator exposes a single current [`CoordinatorStatus`]. There is no
//! transition table: every update overwrites the previous value and is pushed to
//! all subscribers through a `tokio::sync::watch` channel, so a display or a
//! supervising task always sees the most recent state.
//!
//! Each status maps to a [`Severity`] tier used for display:
//!
//! | Status                  | Severity |
//! |-------------------------|----------|
//! | error, disconnected     | red      |
//! | connecting, mismatch    | yellow   |
//! | ready                   | green    |
//! | writing                 | blue     |
//! | unknown                 | grey     |

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::debug;

/// Externally observable state of a write coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorStatus {
    /// The server connection is down.
    Disconnected,
    /// The connection manager is (re)establishing the connection.
    Connecting,
    /// A group session is open and no write is in flight.
    Ready,
    /// A batched write is in flight.
    Writing,
    /// The last operation failed.
    Error,
    /// Configured items and server state disagree.
    Mismatch,
    /// Unrecognised status input.
    #[default]
    #[serde(other)]
    Unknown,
}

impl CoordinatorStatus {
    /// Display tier for this status.
    pub fn severity(self) -> Severity {
        match self {
            Self::Error | Self::Disconnected => Severity::Red,
            Self::Connecting | Self::Mismatch => Severity::Yellow,
            Self::Ready => Severity::Green,
            Self::Writing => Severity::Blue,
            Self::Unknown => Severity::Grey,
        }
    }

    /// Human-readable label, capitalised for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Ready => "Ready",
            Self::Writing => "Writing",
            Self::Error => "Error",
            Self::Mismatch => "Mismatch",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display tier for a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure or lost connection.
    Red,
    /// Transitional or degraded.
    Yellow,
    /// Healthy and idle.
    Green,
    /// Busy.
    Blue,
    /// Indeterminate.
    Grey,
}

/// Snapshot of the status as a display would render it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusIndicator {
    /// Current status.
    pub status: CoordinatorStatus,
    /// Its severity tier.
    pub severity: Severity,
}

impl From<CoordinatorStatus> for StatusIndicator {
    fn from(status: CoordinatorStatus) -> Self {
        Self {
            status,
            severity: status.severity(),
        }
    }
}

/// Holder of the current status with change notification.
///
/// Cloning shares the same underlying channel.
#[derive(Debug, Clone)]
pub struct StatusMonitor {
    tx: watch::Sender<CoordinatorStatus>,
}

impl StatusMonitor {
    /// Create a monitor with the given initial status.
    pub fn new(initial: CoordinatorStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Overwrite the current status. Subscribers are notified even when the value
    /// does not change, so every transition remains observable.
    pub fn set(&self, status: CoordinatorStatus) {
        let previous = self.tx.send_replace(status);
        debug!(from = %previous, to = %status, severity = ?status.severity(), "status changed");
    }

    /// Current status.
    pub fn get(&self) -> CoordinatorStatus {
        *self.tx.borrow()
    }

    /// Current status with its severity tier.
    pub fn indicator(&self) -> StatusIndicator {
        self.get().into()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new(CoordinatorStatus::Unknown)
    }
}
