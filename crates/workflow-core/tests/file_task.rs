mod support;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use filetime::FileTime;
use serde_json::json;
use workflow_core::config::{FnWorkspaceConfig, StaticConfigLoader};
use workflow_core::models::{TaskState, WorkflowConfig};
use workflow_core::orchestration::Scheduler;
use workflow_core::registry::TaskRegistry;
use workflow_core::tasks::{FileCopier, FileTask, StdFileCopier, Task};

#[derive(Default)]
struct CountingCopier {
    copies: AtomicUsize,
}

impl FileCopier for CountingCopier {
    fn copy(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        StdFileCopier.copy(from, to)
    }
}

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn second_run_copies_nothing_and_leaves_the_cache_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("app");
    write(&workspace.join("assets/logo.svg"), "<svg/>");
    write(&workspace.join("assets/fonts/a.woff"), "font");
    let cache_file = dir.path().join("cache.json");

    let copier = Arc::new(CountingCopier::default());
    let registry = TaskRegistry::new()
        .with(Arc::new(FileTask::with_copier(copier.clone())))
        .unwrap();
    let loader = StaticConfigLoader::new().insert(
        workspace.join("workflow.json"),
        FnWorkspaceConfig::new().task("file", |_| {
            Ok(json!([{ "source": "./assets", "dist": "./dist/assets" }]))
        }),
    );
    let workflow = WorkflowConfig::new("workflow.json", &cache_file, dir.path().join("files"))
        .workspace(&workspace);

    let mut scheduler = Scheduler::new(registry).with_loader(Arc::new(loader));
    scheduler.init_workflow(workflow.clone());
    let first = scheduler.execute_task(&["file"]).await.unwrap();
    assert_eq!(first.states("file"), Some(vec![TaskState::Success]));
    assert_eq!(copier.copies.load(Ordering::SeqCst), 2);
    assert_eq!(
        std::fs::read_to_string(workspace.join("dist/assets/fonts/a.woff")).unwrap(),
        "font"
    );
    let cache_after_first = std::fs::read(&cache_file).unwrap();

    scheduler.init_workflow(workflow);
    let second = scheduler.execute_task(&["file"]).await.unwrap();
    assert_eq!(second.states("file"), Some(vec![TaskState::Success]));
    assert_eq!(copier.copies.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(&cache_file).unwrap(), cache_after_first);
}

#[tokio::test]
async fn modified_or_deleted_outputs_are_copied_again() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("app");
    let source = workspace.join("static/a.txt");
    write(&source, "one");
    write(&workspace.join("static/b.txt"), "two");

    let copier = Arc::new(CountingCopier::default());
    let task = FileTask::with_copier(copier.clone());
    let store = support::memory_store(dir.path());
    let config = json!([{ "source": "static", "dist": "out" }]);

    let mut unit = support::unit_for("file", &workspace, dir.path(), store.clone());
    assert_eq!(
        task.execute(&mut unit, &workspace, config.clone()).await.unwrap(),
        TaskState::Success
    );
    assert_eq!(copier.copies.load(Ordering::SeqCst), 2);

    std::fs::write(&source, "changed").unwrap();
    let later = UNIX_EPOCH + Duration::from_secs(4_000_000_000);
    filetime::set_file_mtime(&source, FileTime::from_system_time(later)).unwrap();
    std::fs::remove_file(workspace.join("out/b.txt")).unwrap();

    let mut unit = support::unit_for("file", &workspace, dir.path(), store);
    task.execute(&mut unit, &workspace, config).await.unwrap();
    assert_eq!(copier.copies.load(Ordering::SeqCst), 4);
    assert_eq!(std::fs::read_to_string(workspace.join("out/a.txt")).unwrap(), "changed");
    assert!(workspace.join("out/b.txt").exists());
}

#[tokio::test]
async fn include_and_exclude_patterns_filter_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("app");
    write(&workspace.join("src/img/a.png"), "a");
    write(&workspace.join("src/img/raw/b.png"), "b");
    write(&workspace.join("src/notes.md"), "c");

    let task = FileTask::new();
    let mut unit = support::unit_for("file", &workspace, dir.path(), support::memory_store(dir.path()));
    let config = json!([{
        "source": "src",
        "dist": "dist",
        "include": ["**/*.png"],
        "exclude": ["img/raw/**"]
    }]);

    let state = task.execute(&mut unit, &workspace, config).await.unwrap();
    assert_eq!(state, TaskState::Success);
    assert!(workspace.join("dist/img/a.png").exists());
    assert!(!workspace.join("dist/img/raw/b.png").exists());
    assert!(!workspace.join("dist/notes.md").exists());
}

#[tokio::test]
async fn missing_source_is_an_entry_error() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("app");
    write(&workspace.join("present/a.txt"), "a");

    let task = FileTask::new();
    let mut unit = support::unit_for("file", &workspace, dir.path(), support::memory_store(dir.path()));
    let config = json!([
        { "source": "absent", "dist": "out-a" },
        { "source": "present", "dist": "out-b" }
    ]);

    let state = task.execute(&mut unit, &workspace, config).await.unwrap();
    assert_eq!(state, TaskState::Error);
    assert!(workspace.join("out-b/a.txt").exists());
    assert!(support::log_text(&unit).contains("absent"));
}
