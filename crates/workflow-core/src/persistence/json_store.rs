use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{CacheDocument, CacheStore, PersistenceResult};

pub struct JsonCacheStore {
    path: PathBuf,
    document: Mutex<CacheDocument>,
}

impl JsonCacheStore {
    /// Opens the cache file at `path`. A missing or unreadable file yields an
    /// empty store; opening never fails.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = read_document(&path);
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(CacheDocument::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, operation_name: &str) -> PersistenceResult<MutexGuard<'_, CacheDocument>> {
        self.document
            .lock()
            .map_err(|_| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("cache {operation_name} failed: cache lock poisoned"),
                )
            })
    }
}

impl CacheStore for JsonCacheStore {
    fn get(&self, task: &str, key: &str) -> PersistenceResult<Value> {
        let mut document = self.lock("get")?;
        let value = document
            .entry(task.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        Ok(value.clone())
    }

    fn set(&self, task: &str, key: &str, value: Value) -> PersistenceResult<()> {
        let mut document = self.lock("set")?;
        document
            .entry(task.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn snapshot(&self) -> PersistenceResult<CacheDocument> {
        Ok(self.lock("snapshot")?.clone())
    }

    fn flush(&self) -> PersistenceResult<()> {
        // Held across the write so overlapping flushes cannot interleave.
        let document = self.lock("flush")?;
        let serialized = serde_json::to_string_pretty(&*document)
            .map_err(|error| storage_error("flush", error.to_string()))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| {
                storage_error(
                    "flush",
                    format!("failed to create '{}': {error}", parent.display()),
                )
            })?;
        }

        let staging = staging_path(&self.path);
        fs::write(&staging, serialized).map_err(|error| {
            storage_error(
                "flush",
                format!("failed to write '{}': {error}", staging.display()),
            )
        })?;
        fs::rename(&staging, &self.path).map_err(|error| {
            let _ = fs::remove_file(&staging);
            storage_error(
                "flush",
                format!("failed to replace '{}': {error}", self.path.display()),
            )
        })?;

        Ok(())
    }
}

fn read_document(path: &Path) -> CacheDocument {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::debug!(path = %path.display(), %error, "cache file not readable, starting empty");
            return CacheDocument::new();
        }
    };

    match serde_json::from_str::<CacheDocument>(&raw) {
        Ok(document) => document,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "cache file is corrupt, starting empty");
            CacheDocument::new()
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn storage_error(operation_name: &str, message: String) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("cache {operation_name} failed: {message}"),
    )
}
