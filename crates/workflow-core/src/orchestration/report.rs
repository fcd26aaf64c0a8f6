use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{TaskDescriptor, TaskLogLine, TaskState};

#[derive(Clone, Debug, PartialEq)]
pub struct UnitReport {
    pub task: String,
    pub workspace: PathBuf,
    pub state: TaskState,
    pub elapsed: Duration,
    pub prefix: String,
    pub logs: Vec<TaskLogLine>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskReport {
    pub name: String,
    pub title: String,
    /// One entry per workspace, in the configured workspace order.
    pub units: Vec<UnitReport>,
}

impl TaskReport {
    pub fn states(&self) -> Vec<TaskState> {
        self.units.iter().map(|unit| unit.state).collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowReport {
    tasks: Vec<TaskReport>,
}

impl WorkflowReport {
    pub fn tasks(&self) -> &[TaskReport] {
        &self.tasks
    }

    pub fn states(&self, task: &str) -> Option<Vec<TaskState>> {
        self.tasks
            .iter()
            .find(|report| report.name == task)
            .map(TaskReport::states)
    }

    pub fn results(&self) -> BTreeMap<String, Vec<TaskState>> {
        self.tasks
            .iter()
            .map(|report| (report.name.clone(), report.states()))
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.tasks
            .iter()
            .flat_map(|report| &report.units)
            .any(|unit| unit.state.is_error())
    }

    /// A task requested twice appends its second run to the first entry.
    pub(crate) fn push(&mut self, report: TaskReport) {
        match self.tasks.iter_mut().find(|existing| existing.name == report.name) {
            Some(existing) => existing.units.extend(report.units),
            None => self.tasks.push(report),
        }
    }
}

/// Progress sink for a workflow run. Unit reports arrive in workspace order.
pub trait WorkflowReporter: Send + Sync {
    fn task_started(&self, _descriptor: &TaskDescriptor, _workspaces: usize) {}

    fn unit_finished(&self, _report: &UnitReport) {}

    fn task_finished(&self, _report: &TaskReport) {}
}

pub struct NullReporter;

impl WorkflowReporter for NullReporter {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReporterEvent {
    TaskStarted { task: String, workspaces: usize },
    UnitFinished { task: String, workspace: PathBuf, state: TaskState },
    TaskFinished { task: String, states: Vec<TaskState> },
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReporterEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReporterEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn record(&self, event: ReporterEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl WorkflowReporter for RecordingReporter {
    fn task_started(&self, descriptor: &TaskDescriptor, workspaces: usize) {
        self.record(ReporterEvent::TaskStarted {
            task: descriptor.name.to_string(),
            workspaces,
        });
    }

    fn unit_finished(&self, report: &UnitReport) {
        self.record(ReporterEvent::UnitFinished {
            task: report.task.clone(),
            workspace: report.workspace.clone(),
            state: report.state,
        });
    }

    fn task_finished(&self, report: &TaskReport) {
        self.record(ReporterEvent::TaskFinished {
            task: report.name.clone(),
            states: report.states(),
        });
    }
}

/// Short right-aligned duration: milliseconds below ten seconds, seconds
/// above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if (10_000..100_000_000).contains(&millis) {
        let seconds = millis / 1_000;
        let fraction = millis % 1_000;
        let text = if fraction == 0 {
            format!("{seconds}s ")
        } else {
            let fraction = format!("{fraction:03}");
            format!("{seconds}.{}s ", fraction.trim_end_matches('0'))
        };
        format!("{text:>6}")
    } else {
        format!("{:>6}", format!("{millis}ms"))
    }
}
