use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::{Map, Value};

use crate::models::{CoreError, CoreErrorKind};
use crate::tasks::TaskResult;

/// Modification times (ms since the epoch) of the files one config entry
/// depends on, keyed by path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackedFiles {
    mtimes: BTreeMap<String, u64>,
}

impl TrackedFiles {
    pub fn collect(files: impl IntoIterator<Item = PathBuf>) -> TaskResult<Self> {
        let mut mtimes = BTreeMap::new();
        for file in files {
            let mtime = modified_millis(&file)?;
            mtimes.insert(path_key(&file), mtime);
        }
        Ok(Self { mtimes })
    }

    pub fn len(&self) -> usize {
        self.mtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mtimes.is_empty()
    }

    pub fn is_stale(&self, file: &Path, cached: &Value) -> bool {
        let key = path_key(file);
        let recorded = cached.get(&key).and_then(Value::as_u64);
        recorded != self.mtimes.get(&key).copied()
    }

    /// True when any file is new, changed, or no longer part of the set.
    pub fn changed_since(&self, cached: &Value) -> bool {
        let Some(recorded) = cached.as_object() else {
            return true;
        };
        if recorded.len() != self.mtimes.len() {
            return true;
        }
        self.mtimes
            .iter()
            .any(|(path, mtime)| recorded.get(path).and_then(Value::as_u64) != Some(*mtime))
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.mtimes
                .iter()
                .map(|(path, mtime)| (path.clone(), Value::from(*mtime)))
                .collect::<Map<String, Value>>(),
        )
    }
}

pub fn modified_millis(path: &Path) -> TaskResult<u64> {
    let modified = std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::StorageFailure,
                format!("failed to stat '{}': {error}", path.display()),
            )
        })?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use filetime::FileTime;
    use serde_json::json;

    use super::{TrackedFiles, path_key};

    #[test]
    fn unchanged_files_match_their_recorded_value() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "let a = 1;").unwrap();
        let pinned = UNIX_EPOCH + Duration::from_millis(1_650_000_000_250);
        filetime::set_file_mtime(&file, FileTime::from_system_time(pinned)).unwrap();

        let tracked = TrackedFiles::collect([file.clone()]).unwrap();
        let recorded = tracked.to_value();
        assert_eq!(recorded, json!({ path_key(&file): 1_650_000_000_250_u64 }));
        assert!(!tracked.changed_since(&recorded));
        assert!(!tracked.is_stale(&file, &recorded));
    }

    #[test]
    fn new_touched_or_removed_files_count_as_changes() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.less");
        let second = dir.path().join("b.less");
        std::fs::write(&first, "a").unwrap();
        std::fs::write(&second, "b").unwrap();

        let both = TrackedFiles::collect([first.clone(), second.clone()]).unwrap();
        let only_first = TrackedFiles::collect([first.clone()]).unwrap();

        assert!(both.changed_since(&json!({})));
        assert!(both.changed_since(&only_first.to_value()));
        assert!(only_first.changed_since(&both.to_value()));

        let recorded = both.to_value();
        let later = UNIX_EPOCH + Duration::from_secs(4_000_000_000);
        filetime::set_file_mtime(&second, FileTime::from_system_time(later)).unwrap();
        let touched = TrackedFiles::collect([first, second.clone()]).unwrap();
        assert!(touched.changed_since(&recorded));
        assert!(touched.is_stale(&second, &recorded));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TrackedFiles::collect([dir.path().join("gone.ts")]).is_err());
    }
}
