mod cli;
mod reporter;

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::style;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use workflow_core::execution::TokioProcessExecutor;
use workflow_core::models::{CoreError, CoreErrorKind, TaskState};
use workflow_core::orchestration::{NullReporter, Scheduler, WorkflowReporter};
use workflow_core::registry::TaskRegistry;

use crate::cli::Cli;
use crate::reporter::ConsoleReporter;

const LOG_ENV: &str = "WORKFLOW_LOG";

#[derive(Serialize)]
struct RunSummary {
    results: BTreeMap<String, Vec<TaskState>>,
    errors: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(kind = ?error.kind, message = %error.message, "workflow aborted");
            eprintln!("{} {}", style("error:").red().bold(), error.message);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<ExitCode, CoreError> {
    let registry = TaskRegistry::builtin(Arc::new(TokioProcessExecutor));

    if cli.list {
        for descriptor in registry.descriptors() {
            println!(
                "{:<10} {:<22} {}",
                descriptor.name,
                descriptor.title,
                style(format!("max {}", descriptor.max_concurrent)).dim()
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    for name in cli.tasks.iter().filter(|name| !registry.contains(name)) {
        eprintln!(
            "{} no task named '{name}', ignoring it",
            style("warning:").yellow().bold()
        );
    }

    let cwd = std::env::current_dir().map_err(|error| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("cannot determine the current directory: {error}"),
        )
    })?;
    let workflow = cli.workflow_config(&cwd)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to create Tokio runtime: {error}"),
            )
        })?;

    let reporter: Arc<dyn WorkflowReporter> = if cli.json {
        Arc::new(NullReporter)
    } else {
        Arc::new(ConsoleReporter)
    };
    let mut scheduler = Scheduler::new(registry).with_reporter(reporter);
    scheduler.init_workflow(workflow);
    let report = runtime.block_on(scheduler.execute_task(&cli.tasks))?;

    if cli.json {
        let summary = RunSummary {
            results: report.results(),
            errors: report.has_errors(),
        };
        let rendered = serde_json::to_string_pretty(&summary).map_err(|error| {
            CoreError::new(CoreErrorKind::Internal, format!("failed to render results: {error}"))
        })?;
        println!("{rendered}");
    }

    Ok(if report.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
