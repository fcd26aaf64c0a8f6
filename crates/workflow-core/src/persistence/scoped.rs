use std::sync::Arc;

use serde_json::Value;

use crate::persistence::{CacheStore, PersistenceResult};

/// Cache accessor bound to one task name's namespace.
#[derive(Clone)]
pub struct ScopedCache {
    task: String,
    store: Arc<dyn CacheStore>,
}

impl ScopedCache {
    pub fn new(task: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            task: task.into(),
            store,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn get(&self, key: &str) -> PersistenceResult<Value> {
        self.store.get(&self.task, key)
    }

    pub fn set(&self, key: &str, value: Value) -> PersistenceResult<()> {
        self.store.set(&self.task, key, value)
    }
}
