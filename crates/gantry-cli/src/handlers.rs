//! Command handlers.
//!
//! Each handler returns the process exit code; failure classes map to
//! distinct codes so the invoking host can tell author mistakes (2)
//! from build failures (1), skip-causing eval problems (3), and
//! cancellation (4).

use crate::commands::Commands;
use crate::config::CliConfig;
use console::style;
use gantry_core::ErrorKind;
use gantry_core::pipeline::PipelineDefinition;
use gantry_core::ports::{ArtifactStore, OutputLine, OutputStream};
use gantry_core::run::{InstanceState, RunReport};
use gantry_core::trigger::{EventKind, TriggerContext};
use gantry_engine::{ControllerConfig, PipelineController};
use gantry_runner::{CommandActionAdapter, ShellRunner};
use gantry_store::{FsStore, MemoryStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn dispatch(config: &CliConfig, command: Commands) -> i32 {
    match command {
        Commands::Run {
            path,
            r#ref,
            event,
            max_parallel,
            workspace,
            artifact_dir,
            stream,
            json,
        } => {
            run(
                config,
                &path,
                trigger_from(r#ref, event),
                max_parallel,
                workspace,
                artifact_dir,
                stream,
                json,
            )
            .await
        }
        Commands::Validate { path, r#ref } => validate(&path, trigger_from(r#ref, None)).await,
        Commands::Graph { path, r#ref } => graph(&path, trigger_from(r#ref, None)).await,
    }
}

fn trigger_from(ref_name: Option<String>, event: Option<String>) -> TriggerContext {
    let base = TriggerContext::from_env();
    let event = event
        .and_then(|e| {
            e.parse::<EventKind>()
                .map_err(|err| warn!("{}, using push", err))
                .ok()
        })
        .unwrap_or(base.event);
    TriggerContext::new(event, ref_name.unwrap_or(base.ref_name))
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &CliConfig,
    path: &Path,
    trigger: TriggerContext,
    max_parallel: Option<usize>,
    workspace: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    stream: bool,
    json: bool,
) -> i32 {
    let store: Arc<dyn ArtifactStore> = match artifact_dir {
        Some(dir) => match FsStore::open(dir).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                eprintln!("{} {}", style("✗").red(), err);
                return ErrorKind::Internal.exit_code();
            }
        },
        None => Arc::new(MemoryStore::new()),
    };

    let controller_config = ControllerConfig {
        max_parallel: max_parallel.unwrap_or(config.max_parallel),
        artifact_timeout: Duration::from_secs(config.artifact_timeout_secs),
        workspace: workspace.unwrap_or_else(|| PathBuf::from(".")),
    };

    let mut controller = PipelineController::new(
        controller_config,
        store,
        Arc::new(ShellRunner::default()),
        Arc::new(CommandActionAdapter::new(config.actions_dir())),
    );

    let mut printer = None;
    if stream {
        let (tx, rx) = mpsc::channel::<OutputLine>(256);
        controller = controller.with_output(tx);
        printer = Some(tokio::spawn(print_output(rx)));
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    println!(
        "{} Running {} ({} on {})",
        style("▶").cyan(),
        style(path.display()).bold(),
        trigger.event.as_str(),
        style(trigger.short_ref()).dim()
    );

    let result = controller.run_file(path, &trigger, cancel).await;
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match result {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(body) => println!("{}", body),
                    Err(err) => {
                        eprintln!("{} {}", style("✗").red(), err);
                        return ErrorKind::Internal.exit_code();
                    }
                }
            } else {
                print_report(&report);
            }
            report.exit_code()
        }
        Err(err) => {
            eprintln!("{} {}", style("✗").red(), err);
            err.kind().exit_code()
        }
    }
}

async fn validate(path: &Path, trigger: TriggerContext) -> i32 {
    match load_and_build(path, &trigger).await {
        Ok((definition, summary)) => {
            println!(
                "{} Pipeline \"{}\" is valid",
                style("✓").green(),
                definition.name
            );
            println!(
                "  Jobs: {}  Instances: {}  Edges: {}",
                definition.jobs.len(),
                summary.instances.len(),
                summary.edge_count
            );
            0
        }
        Err(code) => code,
    }
}

async fn graph(path: &Path, trigger: TriggerContext) -> i32 {
    match load_and_build(path, &trigger).await {
        Ok((definition, summary)) => {
            println!("{} ({} instances)", definition.name, summary.instances.len());
            for node in &summary.instances {
                println!("  {}", style(&node.id).bold());
                if !node.needs.is_empty() {
                    println!("    needs: {}", node.needs.join(", "));
                }
                if !node.downloads.is_empty() {
                    println!("    downloads: {}", node.downloads.join(", "));
                }
                if !node.uploads.is_empty() {
                    println!("    uploads: {}", node.uploads.join(", "));
                }
            }
            0
        }
        Err(code) => code,
    }
}

async fn load_and_build(
    path: &Path,
    trigger: &TriggerContext,
) -> Result<(PipelineDefinition, gantry_engine::GraphSummary), i32> {
    let content = tokio::fs::read_to_string(path).await.map_err(|err| {
        eprintln!("{} {}: {}", style("✗").red(), path.display(), err);
        ErrorKind::Config.exit_code()
    })?;

    let definition = PipelineDefinition::from_yaml(&content).map_err(|err| {
        eprintln!("{} {}", style("✗").red(), err);
        err.kind().exit_code()
    })?;

    // Validation needs no runner or store; build against stubs-free
    // graph construction only.
    let controller = PipelineController::new(
        ControllerConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(ShellRunner::default()),
        Arc::new(CommandActionAdapter::new("actions")),
    );
    let summary = controller.validate(&definition, trigger).map_err(|err| {
        eprintln!("{} {}", style("✗").red(), err);
        err.kind().exit_code()
    })?;

    Ok((definition, summary))
}

async fn print_output(mut rx: mpsc::Receiver<OutputLine>) {
    while let Some(line) = rx.recv().await {
        match line.stream {
            OutputStream::Stdout => println!("{}", line.content),
            OutputStream::Stderr => eprintln!("{}", style(line.content).dim()),
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    for instance in &report.instances {
        let symbol = match instance.state {
            InstanceState::Succeeded => style("✓").green(),
            InstanceState::Failed => style("✗").red(),
            InstanceState::Skipped => style("○").yellow(),
            _ => style("?").dim(),
        };
        let duration = instance
            .duration_ms
            .map(|ms| format!(" ({}ms)", ms))
            .unwrap_or_default();
        print!("{} {}{}", symbol, instance.id, style(duration).dim());
        if let Some(message) = &instance.message {
            print!("  {}", style(message).dim());
        }
        println!();
    }

    let status = match report.status {
        gantry_core::run::RunStatus::Succeeded => style("succeeded").green(),
        gantry_core::run::RunStatus::Failed => style("failed").red(),
        gantry_core::run::RunStatus::Cancelled => style("cancelled").yellow(),
    };
    println!(
        "\n{} {} in {}ms",
        style(&report.pipeline).bold(),
        status,
        report.duration_ms
    );
}
