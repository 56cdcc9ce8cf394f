use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Durable key-value storage as the extension platform exposes it: JSON
/// values under string keys, last-write-wins, no transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value);
    async fn remove(&self, key: &str);
    async fn keys(&self) -> Vec<String>;
}

/// In-memory store used by tests and the in-process harness.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn set(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}
