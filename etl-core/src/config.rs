//! Minimal, framework-agnostic configuration: a string key/value store in
//! the style of Feathers' `app.set` / `app.get`, loadable from
//! environment variables with a prefix + `__`-nesting convention. Richer
//! typed configuration (batch sizes, rate-limit windows, drain timeouts) is
//! layered on top by [`PipelineConfig`].

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Load environment variables under `prefix` into the store, mapping
    /// `PREFIX__PAGINATE__DEFAULT` -> `paginate.default`.
    pub fn load_env(prefix: &str) -> Self {
        let mut store = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                store.set(normalized, value);
            }
        }
        store
    }
}

/// Typed configuration for one run of the worker manager, assembled from a
/// [`ConfigStore`] with sane defaults for everything left to the operator
/// (worker counts per stage, drain window, dead-letter threshold).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub broker_url: String,
    pub vector_index_url: String,
    pub workers_per_stage: u32,
    pub drain_timeout: Duration,
    pub dead_letter_threshold: u32,
    pub reset_initial_deadline: Duration,
    pub reset_backoff_schedule: Vec<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/etl".to_string(),
            broker_url: "memory://".to_string(),
            vector_index_url: "http://localhost:6333".to_string(),
            workers_per_stage: 1,
            drain_timeout: Duration::from_secs(30),
            dead_letter_threshold: 5,
            reset_initial_deadline: Duration::from_secs(30),
            reset_backoff_schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(180),
                Duration::from_secs(300),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_store(store: &ConfigStore) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = store.get("database_url") {
            cfg.database_url = v.to_string();
        }
        if let Some(v) = store.get("broker_url") {
            cfg.broker_url = v.to_string();
        }
        if let Some(v) = store.get("vector_index_url") {
            cfg.vector_index_url = v.to_string();
        }
        if let Some(v) = store.get_u32("workers_per_stage") {
            cfg.workers_per_stage = v.clamp(1, 10);
        }
        if let Some(v) = store.get_u32("dead_letter_threshold") {
            cfg.dead_letter_threshold = v;
        }
        cfg
    }
}
