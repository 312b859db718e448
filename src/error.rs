//! Custom error types for the write coordinator.
//!
//! `WriteError` is the crate-wide error type. Capability traits in
//! [`crate::transport`] use `anyhow::Result`, which lets a transport attach a
//! [`StatusCode`](crate::codes::StatusCode) to any failure; those errors are
//! carried here in the `Transport` variant.
//!
//! Every error surfaced to a consumer goes through [`WriteError::diagnostic`],
//! which routes transport failures through the status code table so messages
//! stay stable regardless of how the transport phrased them.

use crate::codes;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, WriteError>;

/// Errors raised by configuration, request parsing and the write path.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// No server connection is configured.
    #[error("Please select a server.")]
    NoServer,

    /// A request named a type outside the supported set.
    #[error("Unsupported item type '{0}'")]
    UnknownType(String),

    /// The item manager answered a batch add with the wrong number of results.
    #[error("Server returned {returned} registration results for {requested} items")]
    RegistrationMismatch {
        /// Items sent for registration.
        requested: usize,
        /// Results received.
        returned: usize,
    },

    /// A write request was not valid JSON.
    #[error("Invalid write request: {0}")]
    Request(#[from] serde_json::Error),

    /// Failure reported by the server or its transport.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl WriteError {
    /// Message suitable for reporting to a consumer.
    pub fn diagnostic(&self) -> String {
        match self {
            WriteError::Transport(err) => codes::translate(err),
            other => other.to_string(),
        }
    }

    /// Whether the failure came from the remote server or its transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, WriteError::Transport(_))
    }
}
