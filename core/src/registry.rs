//! Typed adapter registry
//!
//! Adapters are keyed by their instance name and stored as trait
//! objects, so lookup never involves downcasting: callers get the
//! [`Adapter`] contract and nothing else.

use crate::adapter::Adapter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of live adapters, keyed by adapter name
///
/// Thread-safe container, typically populated at startup and read-only
/// during operation.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name
    ///
    /// Registering the same name twice replaces the previous entry.
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        let name = adapter.name().to_string();
        info!(adapter = %name, kind = adapter.kind(), "Registered adapter");
        self.adapters.write().insert(name, adapter);
    }

    /// Look up an adapter by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.read().get(name).cloned()
    }

    /// Remove an adapter, returning it if present
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.write().remove(name)
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Names of all registered adapters
    pub fn names(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRuntime, AdapterState, AdapterStats, AdapterStatus};
    use crate::error::AdapterError;
    use crate::message::Message;
    use async_trait::async_trait;

    struct NullAdapter {
        name: String,
        runtime: AdapterRuntime,
    }

    impl NullAdapter {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                runtime: AdapterRuntime::new(),
            }
        }
    }

    #[async_trait]
    impl Adapter for NullAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> &str {
            "null"
        }
        async fn initialize(&self) -> Result<(), AdapterError> {
            self.runtime.transition(AdapterState::Connecting);
            Ok(())
        }
        async fn connect(&self) -> Result<(), AdapterError> {
            self.runtime.transition(AdapterState::Connected);
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), AdapterError> {
            self.runtime.transition(AdapterState::Disconnected);
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), AdapterError> {
            self.runtime.transition(AdapterState::Stopped);
            Ok(())
        }
        fn status(&self) -> AdapterStatus {
            self.runtime.status()
        }
        fn stats(&self) -> AdapterStats {
            self.runtime.stats()
        }
        async fn send(&self, _msg: Message) -> Result<(), AdapterError> {
            self.runtime.record_send();
            Ok(())
        }
        async fn receive(&self) -> Result<Option<Message>, AdapterError> {
            Ok(None)
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter::new("grpc-main")));

        assert_eq!(registry.len(), 1);
        let adapter = registry.get("grpc-main").unwrap();
        assert_eq!(adapter.kind(), "null");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_register_same_name_replaces() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter::new("a")));
        registry.register(Arc::new(NullAdapter::new("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter::new("a")));
        assert!(registry.remove("a").is_some());
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_through_registry() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(NullAdapter::new("a")));

        let adapter = registry.get("a").unwrap();
        adapter.initialize().await.unwrap();
        adapter.connect().await.unwrap();
        assert_eq!(adapter.status().state, AdapterState::Connected);
        assert!(adapter.stats().connected_since_ms.is_some());
    }
}
