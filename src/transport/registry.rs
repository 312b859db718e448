//! Server Registry
//!
//! Named server connections a write node can select. Configuration refers to
//! a connection by name (`node.server`); the registry resolves that name to the
//! [`ConnectionManager`] that owns the connection.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let mut registry = ServerRegistry::new();
//! registry.register("plant-a", Arc::new(MockServer::connected()));
//!
//! let coordinator = WriteCoordinator::from_config(&config.node, &registry);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::transport::capabilities::ConnectionManager;

/// Registry of named server connections.
#[derive(Default, Clone)]
pub struct ServerRegistry {
    servers: HashMap<String, Arc<dyn ConnectionManager>>,
}

impl ServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, server: Arc<dyn ConnectionManager>) {
        self.servers.insert(name.into(), server);
    }

    /// Look up a connection by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ConnectionManager>> {
        self.servers.get(name).cloned()
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.servers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("servers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockServer;

    #[test]
    fn resolves_by_name() {
        let mut registry = ServerRegistry::new();
        registry.register("b", Arc::new(MockServer::new()));
        registry.register("a", Arc::new(MockServer::connected()));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("a").is_some_and(|s| s.is_connected()));
        assert!(registry.get("missing").is_none());
    }
}
