//! Server handle cache.
//!
//! Registering an item costs a round trip, and upstream sources tend to write
//! the same items over and over. The cache remembers the server handle of
//! every item that registered successfully so later writes can go straight to
//! the batched write call.
//!
//! Failed registrations are not cached; the item is retried the next time it
//! appears in a request.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::codes;
use crate::error::{AppResult, WriteError};
use crate::item::{ClientHandle, ItemId, ServerHandle};
use crate::transport::{ItemDefinition, ItemManager};

/// Outcome of registering one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Already registered before this call.
    Cached(ServerHandle),
    /// Registered by this call.
    Registered(ServerHandle),
    /// The server refused the item.
    Rejected {
        /// Status code returned by the server.
        code: u32,
        /// Translated message for `code`.
        message: String,
    },
}

impl RegistrationOutcome {
    /// Server handle, if the item is registered.
    pub fn handle(&self) -> Option<ServerHandle> {
        match self {
            Self::Cached(handle) | Self::Registered(handle) => Some(*handle),
            Self::Rejected { .. } => None,
        }
    }
}

/// Item handle cache for one group session.
#[derive(Debug, Default)]
pub struct HandleCache {
    handles: HashMap<ItemId, ServerHandle>,
    last_client_handle: ClientHandle,
}

impl HandleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Server handle for `item_id`, if registered.
    pub fn lookup(&self, item_id: &ItemId) -> Option<ServerHandle> {
        self.handles.get(item_id).copied()
    }

    /// Whether `item_id` is registered.
    pub fn contains(&self, item_id: &ItemId) -> bool {
        self.handles.contains_key(item_id)
    }

    /// Number of registered items.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Last client handle handed out; zero if none.
    pub fn last_client_handle(&self) -> ClientHandle {
        self.last_client_handle
    }

    /// Drop every entry and restart client handles at 1.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.last_client_handle = 0;
    }

    /// Make sure every item in `item_ids` is registered.
    ///
    /// Unknown items are registered through `manager` in a single `add` call,
    /// each with a fresh client handle. Duplicates within `item_ids` are
    /// registered once.
    ///
    /// # Errors
    /// Fails if the `add` call itself fails or returns a result count that does
    /// not match the request. Per-item rejections are not errors; they come
    /// back as [`RegistrationOutcome::Rejected`].
    pub async fn ensure_registered<'a, I>(
        &mut self,
        item_ids: I,
        manager: &dyn ItemManager,
    ) -> AppResult<HashMap<ItemId, RegistrationOutcome>>
    where
        I: IntoIterator<Item = &'a ItemId>,
    {
        let mut outcomes = HashMap::new();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for item_id in item_ids {
            if !seen.insert(item_id) {
                continue;
            }
            match self.lookup(item_id) {
                Some(handle) => {
                    outcomes.insert(item_id.clone(), RegistrationOutcome::Cached(handle));
                }
                None => {
                    self.last_client_handle += 1;
                    pending.push(ItemDefinition {
                        item_id: item_id.clone(),
                        client_handle: self.last_client_handle,
                    });
                }
            }
        }

        if pending.is_empty() {
            return Ok(outcomes);
        }

        debug!(count = pending.len(), "registering items");
        let results = manager.add(&pending).await?;
        if results.len() != pending.len() {
            return Err(WriteError::RegistrationMismatch {
                requested: pending.len(),
                returned: results.len(),
            });
        }

        for (definition, result) in pending.into_iter().zip(results) {
            let outcome = if result.status == codes::S_OK {
                self.handles
                    .insert(definition.item_id.clone(), result.server_handle);
                RegistrationOutcome::Registered(result.server_handle)
            } else {
                RegistrationOutcome::Rejected {
                    code: result.status,
                    message: codes::describe_code(result.status),
                }
            };
            outcomes.insert(definition.item_id, outcome);
        }

        Ok(outcomes)
    }
}
