use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use workflow_core::config::{FnWorkspaceConfig, JsonConfigLoader, StaticConfigLoader};
use workflow_core::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState, WorkflowConfig};
use workflow_core::orchestration::{RecordingReporter, ReporterEvent, Scheduler};
use workflow_core::persistence::CacheStore;
use workflow_core::registry::TaskRegistry;
use workflow_core::tasks::{Task, TaskFuture, TaskUnit};

const ENTRY: &str = "workflow.json";

/// Behaviour is driven by the unit's config:
/// `{"delayMs": n, "state": "...", "fail": bool, "panic": bool, "cache": v}`.
struct ProbeTask {
    descriptor: TaskDescriptor,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl ProbeTask {
    fn new(name: &'static str, max_concurrent: usize) -> Self {
        Self {
            descriptor: TaskDescriptor::new(name, "Probe").max_concurrent(max_concurrent),
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Task for ProbeTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    fn execute<'a>(
        &'a self,
        unit: &'a mut TaskUnit,
        workspace: &'a Path,
        config: Value,
    ) -> TaskFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = config.get("delayMs").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            unit.print(format!("ran in {}", workspace.display()));
            if let Some(value) = config.get("cache") {
                unit.set_cache(&workspace.display().to_string(), value.clone())?;
            }
            if config.get("panic").and_then(Value::as_bool).unwrap_or(false) {
                panic!("probe panicked");
            }
            if config.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                return Err(CoreError::new(CoreErrorKind::ProcessFailure, "probe failed"));
            }
            let state = config
                .get("state")
                .and_then(Value::as_str)
                .unwrap_or("success")
                .parse::<TaskState>()?;
            Ok(state)
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    cache_file: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        Self {
            cache_file: root.join("state/cache.json"),
            root,
            _dir: dir,
        }
    }

    fn workspace(&self, name: &str) -> PathBuf {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    fn workflow(&self, workspaces: &[&PathBuf]) -> WorkflowConfig {
        let mut config = WorkflowConfig::new(ENTRY, &self.cache_file, self.root.join("files"));
        for workspace in workspaces {
            config = config.workspace(*workspace);
        }
        config
    }
}

fn probe_config(name: &'static str, value: Value) -> FnWorkspaceConfig {
    FnWorkspaceConfig::new().task(name, move |_| Ok(value.clone()))
}

fn scheduler_with(task: Arc<ProbeTask>, loader: StaticConfigLoader) -> Scheduler {
    let registry = TaskRegistry::new().with(task).unwrap();
    Scheduler::new(registry).with_loader(Arc::new(loader))
}

#[tokio::test]
async fn executing_before_init_is_an_error() {
    let scheduler = Scheduler::new(TaskRegistry::new());
    let error = scheduler.execute_task(&["tsc"]).await.unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::NotInitialized);
}

#[tokio::test]
async fn every_workspace_reports_in_configured_order() {
    let fixture = Fixture::new();
    let first = fixture.workspace("a");
    let second = fixture.workspace("b");
    let loader = StaticConfigLoader::new()
        .insert(first.join(ENTRY), probe_config("probe", json!({})))
        .insert(second.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&first, &second]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(
        report.states("probe"),
        Some(vec![TaskState::Success, TaskState::Success])
    );
    let workspaces: Vec<_> = report.tasks()[0]
        .units
        .iter()
        .map(|unit| unit.workspace.clone())
        .collect();
    assert_eq!(workspaces, vec![first, second]);
    assert!(!report.has_errors());
}

#[tokio::test]
async fn unknown_task_names_are_ignored() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let loader = StaticConfigLoader::new().insert(workspace.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    let report = scheduler.execute_task(&["nope", "probe"]).await.unwrap();

    assert_eq!(report.results().len(), 1);
    assert!(report.states("nope").is_none());
}

#[tokio::test]
async fn missing_config_skips_without_touching_the_cache() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let task = Arc::new(ProbeTask::new("probe", 1));

    let mut scheduler = scheduler_with(Arc::clone(&task), StaticConfigLoader::new());
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe"), Some(vec![TaskState::Skip]));
    assert_eq!(task.calls.load(Ordering::SeqCst), 0);
    assert!(!fixture.cache_file.exists());
}

#[tokio::test]
async fn config_without_the_task_entry_skips() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let loader = StaticConfigLoader::new().insert(workspace.join(ENTRY), probe_config("other", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe"), Some(vec![TaskState::Skip]));
}

#[tokio::test]
async fn concurrency_never_exceeds_the_task_bound() {
    let fixture = Fixture::new();
    let mut loader = StaticConfigLoader::new();
    let mut workspaces = Vec::new();
    for index in 0..6 {
        let workspace = fixture.workspace(&format!("ws{index}"));
        loader = loader.insert(workspace.join(ENTRY), probe_config("probe", json!({ "delayMs": 20 })));
        workspaces.push(workspace);
    }

    let task = Arc::new(ProbeTask::new("probe", 2));
    let mut scheduler = scheduler_with(Arc::clone(&task), loader);
    scheduler.init_workflow(fixture.workflow(&workspaces.iter().collect::<Vec<_>>()));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe").unwrap().len(), 6);
    assert_eq!(task.calls.load(Ordering::SeqCst), 6);
    assert_eq!(task.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reports_stay_in_workspace_order_when_later_units_finish_first() {
    let fixture = Fixture::new();
    let slow = fixture.workspace("slow");
    let fast = fixture.workspace("fast");
    let faster = fixture.workspace("faster");
    let loader = StaticConfigLoader::new()
        .insert(slow.join(ENTRY), probe_config("probe", json!({ "delayMs": 80 })))
        .insert(fast.join(ENTRY), probe_config("probe", json!({ "delayMs": 10, "state": "warn" })))
        .insert(faster.join(ENTRY), probe_config("probe", json!({ "delayMs": 1 })));

    let reporter = Arc::new(RecordingReporter::new());
    let mut scheduler =
        scheduler_with(Arc::new(ProbeTask::new("probe", 3)), loader).with_reporter(reporter.clone());
    scheduler.init_workflow(fixture.workflow(&[&slow, &fast, &faster]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(
        report.states("probe"),
        Some(vec![TaskState::Success, TaskState::Warn, TaskState::Success])
    );
    assert_eq!(
        reporter.events(),
        vec![
            ReporterEvent::TaskStarted {
                task: "probe".to_string(),
                workspaces: 3
            },
            ReporterEvent::UnitFinished {
                task: "probe".to_string(),
                workspace: slow,
                state: TaskState::Success
            },
            ReporterEvent::UnitFinished {
                task: "probe".to_string(),
                workspace: fast,
                state: TaskState::Warn
            },
            ReporterEvent::UnitFinished {
                task: "probe".to_string(),
                workspace: faster,
                state: TaskState::Success
            },
            ReporterEvent::TaskFinished {
                task: "probe".to_string(),
                states: vec![TaskState::Success, TaskState::Warn, TaskState::Success]
            },
        ]
    );
}

#[tokio::test]
async fn failing_units_do_not_stop_the_rest() {
    let fixture = Fixture::new();
    let failing = fixture.workspace("failing");
    let panicking = fixture.workspace("panicking");
    let healthy = fixture.workspace("healthy");
    let loader = StaticConfigLoader::new()
        .insert(failing.join(ENTRY), probe_config("probe", json!({ "fail": true })))
        .insert(panicking.join(ENTRY), probe_config("probe", json!({ "panic": true })))
        .insert(healthy.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&failing, &panicking, &healthy]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(
        report.states("probe"),
        Some(vec![TaskState::Error, TaskState::Error, TaskState::Success])
    );
    let failing_logs: Vec<_> = report.tasks()[0].units[0]
        .logs
        .iter()
        .map(|line| line.message.clone())
        .collect();
    assert!(failing_logs.iter().any(|message| message == "probe failed"));
    assert!(report.has_errors());
}

#[tokio::test]
async fn unknown_state_from_a_task_is_reported_as_error() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let loader = StaticConfigLoader::new()
        .insert(workspace.join(ENTRY), probe_config("probe", json!({ "state": "unknown" })));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe"), Some(vec![TaskState::Error]));
}

#[tokio::test]
async fn cache_is_persisted_after_each_unit() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let loader = StaticConfigLoader::new()
        .insert(workspace.join(ENTRY), probe_config("probe", json!({ "cache": { "x": 1 } })));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    scheduler.execute_task(&["probe"]).await.unwrap();

    let persisted: Value =
        serde_json::from_str(&std::fs::read_to_string(&fixture.cache_file).unwrap()).unwrap();
    assert_eq!(
        persisted["probe"][workspace.display().to_string()],
        json!({ "x": 1 })
    );

    // A fresh init reads what the previous run wrote.
    let mut reloaded = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), StaticConfigLoader::new());
    reloaded.init_workflow(fixture.workflow(&[&workspace]));
    let snapshot = reloaded.cache().unwrap().snapshot().unwrap();
    assert_eq!(
        snapshot["probe"][&workspace.display().to_string()],
        json!({ "x": 1 })
    );
}

#[tokio::test]
async fn cache_write_failure_marks_the_unit_as_error() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let blocker = fixture.root.join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let loader = StaticConfigLoader::new().insert(workspace.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    let mut workflow = fixture.workflow(&[&workspace]);
    workflow.cache_file = blocker.join("cache.json");
    scheduler.init_workflow(workflow);
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe"), Some(vec![TaskState::Error]));
}

#[tokio::test]
async fn repeated_task_names_append_results() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    let loader = StaticConfigLoader::new().insert(workspace.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&workspace]));
    let report = scheduler.execute_task(&["probe", "probe"]).await.unwrap();

    assert_eq!(
        report.states("probe"),
        Some(vec![TaskState::Success, TaskState::Success])
    );
}

#[tokio::test]
async fn reinitializing_replaces_the_workflow() {
    let fixture = Fixture::new();
    let first = fixture.workspace("a");
    let second = fixture.workspace("b");
    let loader = StaticConfigLoader::new()
        .insert(first.join(ENTRY), probe_config("probe", json!({})))
        .insert(second.join(ENTRY), probe_config("probe", json!({})));

    let mut scheduler = scheduler_with(Arc::new(ProbeTask::new("probe", 1)), loader);
    scheduler.init_workflow(fixture.workflow(&[&first, &second]));
    scheduler.init_workflow(fixture.workflow(&[&second]));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(report.states("probe"), Some(vec![TaskState::Success]));
    assert_eq!(scheduler.workflow().unwrap().workspaces, vec![second]);
}

#[tokio::test]
async fn json_entry_files_receive_workflow_params() {
    let fixture = Fixture::new();
    let workspace = fixture.workspace("a");
    std::fs::write(
        workspace.join(ENTRY),
        r#"{ "probe": { "state": { "$if": "release", "then": "success", "else": "warn" } } }"#,
    )
    .unwrap();
    let broken = fixture.workspace("b");
    std::fs::write(broken.join(ENTRY), "{ not json").unwrap();

    let registry = TaskRegistry::new()
        .with(Arc::new(ProbeTask::new("probe", 1)))
        .unwrap();
    let mut scheduler = Scheduler::new(registry).with_loader(Arc::new(JsonConfigLoader));
    scheduler.init_workflow(fixture.workflow(&[&workspace, &broken]).param("release", false));
    let report = scheduler.execute_task(&["probe"]).await.unwrap();

    assert_eq!(
        report.states("probe"),
        Some(vec![TaskState::Warn, TaskState::Error])
    );
}
