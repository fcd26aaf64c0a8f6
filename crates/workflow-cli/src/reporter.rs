use console::{Style, style};
use workflow_core::models::{TaskDescriptor, TaskLogLevel, TaskState};
use workflow_core::orchestration::{TaskReport, UnitReport, WorkflowReporter, format_elapsed};

/// Human-readable progress on stdout.
pub struct ConsoleReporter;

impl WorkflowReporter for ConsoleReporter {
    fn task_started(&self, descriptor: &TaskDescriptor, workspaces: usize) {
        println!(
            "{} {}",
            style(descriptor.title).cyan().bold(),
            style(format!("[{}] {workspaces} workspace(s)", descriptor.name)).dim()
        );
    }

    fn unit_finished(&self, report: &UnitReport) {
        println!(
            "  {} {} {}",
            style(format_elapsed(report.elapsed)).dim(),
            state_style(report.state).apply_to(format!("{:<7}", report.state.as_str())),
            report.workspace.display()
        );
        for line in &report.logs {
            println!(
                "  {}{}",
                report.prefix,
                level_style(line.level).apply_to(&line.message)
            );
        }
    }

    fn task_finished(&self, report: &TaskReport) {
        let failed = report
            .units
            .iter()
            .filter(|unit| unit.state.is_error())
            .count();
        if failed > 0 {
            println!(
                "{}",
                style(format!("{} failed in {failed} workspace(s)", report.name))
                    .red()
                    .bold()
            );
        }
    }
}

fn state_style(state: TaskState) -> Style {
    match state {
        TaskState::Success => Style::new().green(),
        TaskState::Skip => Style::new().dim(),
        TaskState::Warn => Style::new().yellow(),
        TaskState::Error => Style::new().red().bold(),
        TaskState::Unknown => Style::new().magenta(),
    }
}

fn level_style(level: TaskLogLevel) -> Style {
    match level {
        TaskLogLevel::Info => Style::new(),
        TaskLogLevel::Highlight => Style::new().cyan(),
        TaskLogLevel::Muted => Style::new().dim(),
        TaskLogLevel::Warn => Style::new().yellow(),
        TaskLogLevel::Error => Style::new().red(),
    }
}
