use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::{ConfigLoader, ConfigResult, JsonConfigLoader};
use crate::models::{CoreError, CoreErrorKind, TaskLogLevel, TaskLogLine, TaskState, WorkflowConfig};
use crate::orchestration::limiter::{ConcurrencyLimiter, WorkItem};
use crate::orchestration::report::{
    NullReporter, TaskReport, UnitReport, WorkflowReport, WorkflowReporter,
};
use crate::orchestration::OrchestrationResult;
use crate::persistence::{CacheStore, JsonCacheStore, ScopedCache};
use crate::registry::TaskRegistry;
use crate::tasks::{Task, TaskUnit};

/// Runs registered tasks across the workspaces of the active workflow.
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    loader: Arc<dyn ConfigLoader>,
    reporter: Arc<dyn WorkflowReporter>,
    active: Option<ActiveWorkflow>,
}

#[derive(Clone)]
struct ActiveWorkflow {
    config: Arc<WorkflowConfig>,
    cache: Arc<dyn CacheStore>,
}

struct UnitJob {
    task: Arc<dyn Task>,
    workspace: PathBuf,
    workflow: ActiveWorkflow,
    loader: Arc<dyn ConfigLoader>,
}

impl Scheduler {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            loader: Arc::new(JsonConfigLoader),
            reporter: Arc::new(NullReporter),
            active: None,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ConfigLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn WorkflowReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Makes `config` the active workflow and loads its cache file. A cache
    /// file that is missing or unreadable starts an empty cache. Replaces any
    /// previously active workflow.
    pub fn init_workflow(&mut self, config: WorkflowConfig) {
        let cache = JsonCacheStore::load(config.cache_file.clone());
        self.init_with_cache(config, Arc::new(cache));
    }

    pub fn init_with_cache(&mut self, config: WorkflowConfig, cache: Arc<dyn CacheStore>) {
        tracing::debug!(
            entry = %config.entry,
            workspaces = config.workspaces.len(),
            cache_file = %config.cache_file.display(),
            "workflow initialized"
        );
        self.active = Some(ActiveWorkflow {
            config: Arc::new(config),
            cache,
        });
    }

    pub fn workflow(&self) -> Option<&WorkflowConfig> {
        self.active.as_ref().map(|active| active.config.as_ref())
    }

    pub fn cache(&self) -> Option<Arc<dyn CacheStore>> {
        self.active.as_ref().map(|active| Arc::clone(&active.cache))
    }

    /// Runs each named task in order over every workspace. Names with no
    /// registered task are ignored.
    pub async fn execute_task<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> OrchestrationResult<WorkflowReport> {
        let active = self.active.clone().ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::NotInitialized,
                "initialize the workflow before executing tasks",
            )
        })?;

        let mut report = WorkflowReport::default();
        for name in names {
            let name = name.as_ref();
            let Some(task) = self.registry.get(name) else {
                tracing::debug!(task = %name, "no task registered under this name");
                continue;
            };
            report.push(self.run_task(&active, task).await);
        }
        Ok(report)
    }

    async fn run_task(&self, active: &ActiveWorkflow, task: Arc<dyn Task>) -> TaskReport {
        let descriptor = task.descriptor().clone();
        let workspaces = active.config.workspaces.clone();
        let started = Instant::now();

        tracing::info!(
            task = descriptor.name,
            workspaces = workspaces.len(),
            max_concurrent = descriptor.max_concurrent,
            "task started"
        );
        self.reporter.task_started(&descriptor, workspaces.len());

        let jobs: Vec<WorkItem<UnitReport>> = workspaces
            .iter()
            .map(|workspace| {
                let job = UnitJob {
                    task: Arc::clone(&task),
                    workspace: workspace.clone(),
                    workflow: active.clone(),
                    loader: Arc::clone(&self.loader),
                };
                Box::pin(run_unit(job)) as WorkItem<UnitReport>
            })
            .collect();

        // Completed units wait here until every earlier workspace has been
        // reported.
        let mut slots: Vec<Option<UnitReport>> = vec![None; workspaces.len()];
        let mut next_to_report = 0;
        ConcurrencyLimiter::new(descriptor.max_concurrent)
            .run(jobs, |index, result| {
                let unit = result.unwrap_or_else(|error| {
                    tracing::error!(
                        task = descriptor.name,
                        workspace = %workspaces[index].display(),
                        message = %error.message,
                        "task unit aborted"
                    );
                    aborted_unit(descriptor.name, workspaces[index].clone(), &error)
                });
                slots[index] = Some(unit);
                while let Some(Some(ready)) = slots.get(next_to_report) {
                    self.reporter.unit_finished(ready);
                    next_to_report += 1;
                }
            })
            .await;

        let units: Vec<UnitReport> = slots
            .into_iter()
            .zip(&workspaces)
            .map(|(slot, workspace)| {
                slot.unwrap_or_else(|| {
                    let error = CoreError::new(CoreErrorKind::Internal, "task unit never completed");
                    aborted_unit(descriptor.name, workspace.clone(), &error)
                })
            })
            .collect();

        let report = TaskReport {
            name: descriptor.name.to_string(),
            title: descriptor.title.to_string(),
            units,
        };
        tracing::info!(
            task = descriptor.name,
            elapsed_ms = elapsed_ms(started.elapsed()),
            errors = report.units.iter().filter(|unit| unit.state.is_error()).count(),
            "task finished"
        );
        self.reporter.task_finished(&report);
        report
    }
}

async fn run_unit(job: UnitJob) -> UnitReport {
    let started = Instant::now();
    let name = job.task.descriptor().name;
    let config = &job.workflow.config;
    let mut unit = TaskUnit::new(
        job.workspace.clone(),
        config.cache_dir.clone(),
        ScopedCache::new(name, Arc::clone(&job.workflow.cache)),
    );

    let state = match resolve_unit_config(&job, name) {
        Ok(Some(value)) => execute_unit(&job, &mut unit, value).await,
        Ok(None) => {
            unit.muted(format!("no '{name}' configuration in {}", config.entry));
            TaskState::Skip
        }
        Err(error) => {
            tracing::warn!(
                task = name,
                workspace = %job.workspace.display(),
                kind = ?error.kind,
                message = %error.message,
                "failed to load workspace configuration"
            );
            unit.error(error.message);
            TaskState::Error
        }
    };

    let elapsed = started.elapsed();
    tracing::debug!(
        task = name,
        workspace = %job.workspace.display(),
        state = %state,
        elapsed_ms = elapsed_ms(elapsed),
        "task unit finished"
    );

    UnitReport {
        task: name.to_string(),
        workspace: job.workspace,
        state,
        elapsed,
        prefix: unit.prefix().to_string(),
        logs: unit.into_logs(),
    }
}

fn resolve_unit_config(job: &UnitJob, name: &str) -> ConfigResult<Option<Value>> {
    let config = &job.workflow.config;
    let path = config.config_file(&job.workspace);
    let Some(workspace_config) = job
        .loader
        .load(&path)
        .map_err(|error| error.attribute(name, &job.workspace))?
    else {
        return Ok(None);
    };

    workspace_config
        .resolve(name, &config.params)
        .transpose()
        .map_err(|error| error.attribute(name, &job.workspace))
}

async fn execute_unit(job: &UnitJob, unit: &mut TaskUnit, config: Value) -> TaskState {
    let name = job.task.descriptor().name;
    let mut state = match job.task.execute(unit, &job.workspace, config).await {
        Ok(TaskState::Unknown) => {
            unit.error("task finished without reporting a state");
            TaskState::Error
        }
        Ok(state) => state,
        Err(error) => {
            let error = error.attribute(name, &job.workspace);
            tracing::warn!(
                task = name,
                workspace = %job.workspace.display(),
                kind = ?error.kind,
                message = %error.message,
                "task unit failed"
            );
            unit.error(error.message);
            TaskState::Error
        }
    };

    if let Err(error) = flush_cache(Arc::clone(&job.workflow.cache)).await {
        tracing::error!(
            task = name,
            workspace = %job.workspace.display(),
            kind = ?error.kind,
            message = %error.message,
            "failed to persist workflow cache"
        );
        unit.error(error.message);
        state = TaskState::Error;
    }
    state
}

async fn flush_cache(cache: Arc<dyn CacheStore>) -> OrchestrationResult<()> {
    tokio::task::spawn_blocking(move || cache.flush())
        .await
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("cache flush worker failed: {error}"),
            )
        })?
}

fn aborted_unit(task: &str, workspace: PathBuf, error: &CoreError) -> UnitReport {
    UnitReport {
        task: task.to_string(),
        workspace,
        state: TaskState::Error,
        elapsed: Duration::ZERO,
        prefix: String::new(),
        logs: vec![TaskLogLine::new(TaskLogLevel::Error, error.message.clone())],
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
