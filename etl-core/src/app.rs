//! Scoped resource registry.
//!
//! Long-lived clients (HTTP, DB pool, vector-index client, embedding
//! provider, broker) are acquired once by the worker manager and handed to
//! workers as references; workers never hold a reference that outlives the
//! manager. This mirrors `DogApp`'s typed `set`/`get` registry: a single
//! container owns everything, there is no module-level mutable state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A type-erased, typed-get/set registry of shared resources, scoped to one
/// running pipeline manager instance.
#[derive(Default)]
pub struct PipelineRegistry {
    resources: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self { resources: RwLock::new(HashMap::new()) }
    }

    /// Register a resource under `key`. Overwrites any existing value.
    /// `T` is usually a trait object (`dyn QueueBackend` and friends),
    /// hence `?Sized`.
    pub fn set<T: Send + Sync + ?Sized + 'static>(&self, key: &str, value: Arc<T>) {
        self.resources.write().unwrap().insert(key.to_string(), Box::new(value));
    }

    /// Fetch a previously registered resource by key and type.
    pub fn get<T: Send + Sync + ?Sized + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.resources
            .read()
            .unwrap()
            .get(key)
            .and_then(|boxed| boxed.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Remove a resource, returning whether one was present. Used during
    /// shutdown to drop references in a controlled, reverse-of-acquisition
    /// order before the owning `Arc`'s finalizer runs.
    pub fn remove(&self, key: &str) -> bool {
        self.resources.write().unwrap().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.resources.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let registry = PipelineRegistry::new();
        registry.set("db", Arc::new(42u32));
        assert_eq!(*registry.get::<u32>("db").unwrap(), 42);
        assert!(registry.get::<u64>("db").is_none());
    }

    #[test]
    fn remove_reports_presence() {
        let registry = PipelineRegistry::new();
        registry.set("db", Arc::new(42u32));
        assert!(registry.remove("db"));
        assert!(!registry.remove("db"));
    }
}
