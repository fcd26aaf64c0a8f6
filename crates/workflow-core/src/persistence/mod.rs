pub mod json_store;
pub mod scoped;

pub use json_store::JsonCacheStore;
pub use scoped::ScopedCache;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::CoreError;

pub type PersistenceResult<T> = Result<T, CoreError>;

/// Task name -> (entry key -> value). Ordered so equal contents serialise to
/// equal bytes.
pub type CacheDocument = BTreeMap<String, BTreeMap<String, Value>>;

pub trait CacheStore: Send + Sync {
    /// Returns the value stored under `key`, inserting an empty object first
    /// when there is none.
    fn get(&self, task: &str, key: &str) -> PersistenceResult<Value>;

    fn set(&self, task: &str, key: &str, value: Value) -> PersistenceResult<()>;

    fn snapshot(&self) -> PersistenceResult<CacheDocument>;

    /// Writes the whole document, replacing whatever was persisted before.
    fn flush(&self) -> PersistenceResult<()>;
}
