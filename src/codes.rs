//! OPC DA status code translation.
//!
//! Servers report failures as bare 32-bit `HRESULT`-style codes. This module keeps the
//! fixed table of codes the write path knows how to describe and turns transport errors
//! into stable, human-readable diagnostics.
//!
//! Lookup is by exact code equality. Anything not in the table falls back to the
//! message carried by the error itself.
//!
//! # Example
//!
//! ```rust
//! use opcda_write::codes::{self, StatusCode};
//!
//! let err = anyhow::Error::new(StatusCode(0xC004_0008));
//! assert_eq!(
//!     codes::translate(&err),
//!     "The item ID doesn't conform to the server's syntax."
//! );
//!
//! let other = anyhow::anyhow!("socket closed");
//! assert_eq!(codes::translate(&other), "socket closed");
//! ```

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// `S_OK`: the status an item manager returns for a successfully added item.
pub const S_OK: u32 = 0x0000_0000;

/// Known status codes and their descriptions.
pub const STATUS_MESSAGES: &[(u32, &str)] = &[
    (0x8004_0154, "Clsid is not found."),
    (0x0000_0005, "Access denied. Username and/or password might be wrong."),
    (0xC004_0006, "The Items AccessRights do not allow the operation."),
    (
        0xC004_0004,
        "The server cannot convert the data between the specified format/ requested data type and the canonical data type.",
    ),
    (0xC004_000C, "Duplicate name not allowed."),
    (0xC004_0010, "The server's configuration file is an invalid format."),
    (0xC004_0009, "The filter string was not valid"),
    (
        0xC004_0001,
        "The value of the handle is invalid. Note: a client should never pass an invalid handle to a server. If this error occurs, it is due to a programming error in the client or possibly in the server.",
    ),
    (0xC004_0008, "The item ID doesn't conform to the server's syntax."),
    (0xC004_0203, "The passed property ID is not valid for the item."),
    (0xC004_0011, "Requested Object (e.g. a public group) was not found."),
    (0xC004_0005, "The requested operation cannot be done on a public group."),
    (0xC004_000B, "The value was out of range."),
    (
        0xC004_0007,
        "The item ID is not defined in the server address space (on add or validate) or no longer exists in the server address space (for read or write).",
    ),
    (0xC004_000A, "The item's access path is not known to the server."),
    (0x0004_000E, "A value passed to WRITE was accepted but the output was clamped."),
    (0x0004_000F, "The operation cannot be performed because the object is being referenced."),
    (
        0x0004_000D,
        "The server does not support the requested data rate but will use the closest available rate.",
    ),
    (0x0000_0061, "Clsid syntax is invalid"),
];

static STATUS_TABLE: Lazy<HashMap<u32, &'static str>> =
    Lazy::new(|| STATUS_MESSAGES.iter().copied().collect());

/// A raw status code returned by the server.
///
/// Transports surface protocol-level failures by wrapping this in an
/// [`anyhow::Error`], which lets [`translate`] recover the code by downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// Whether this is the success code.
    pub fn is_ok(self) -> bool {
        self.0 == S_OK
    }

    /// Fixed description for this code, if it is a known one.
    pub fn description(self) -> Option<&'static str> {
        describe(self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OPC status 0x{:08X}", self.0)
    }
}

impl std::error::Error for StatusCode {}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

/// Look up the fixed description for a status code.
pub fn describe(code: u32) -> Option<&'static str> {
    STATUS_TABLE.get(&code).copied()
}

/// Describe a status code, falling back to its hex rendering when unknown.
pub fn describe_code(code: u32) -> String {
    describe(code)
        .map(str::to_owned)
        .unwrap_or_else(|| StatusCode(code).to_string())
}

/// Translate a transport error into a diagnostic message.
///
/// Walks the error chain looking for a [`StatusCode`]; the first known code wins.
/// Otherwise the error's own message is returned unchanged.
pub fn translate(err: &anyhow::Error) -> String {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<StatusCode>())
        .find_map(|code| code.description())
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string())
}
