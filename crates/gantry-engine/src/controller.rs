//! Run orchestration.
//!
//! The controller ties the pieces together: parse and validate the
//! definition, materialize the graph, schedule it, and fold the
//! terminal instance states into a [`RunReport`]. Configuration
//! errors surface as `Err` before anything executes; everything that
//! happens after the first step starts is reported through the
//! instance states instead.

use crate::executor::InstanceExecutor;
use crate::graph::GraphBuilder;
use crate::scheduler::Scheduler;
use gantry_core::pipeline::PipelineDefinition;
use gantry_core::ports::{ActionAdapter, ArtifactStore, OutputLine, StepRunner};
use gantry_core::run::{InstanceState, RunReport, RunStatus};
use gantry_core::trigger::TriggerContext;
use gantry_core::{ErrorKind, Result, RunId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Instances allowed to run concurrently.
    pub max_parallel: usize,
    /// How long a download step waits for its artifact.
    pub artifact_timeout: Duration,
    /// Directory step bodies run in.
    pub workspace: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            artifact_timeout: Duration::from_secs(60),
            workspace: PathBuf::from("."),
        }
    }
}

pub struct PipelineController {
    config: ControllerConfig,
    store: Arc<dyn ArtifactStore>,
    runner: Arc<dyn StepRunner>,
    adapter: Arc<dyn ActionAdapter>,
    output: Option<mpsc::Sender<OutputLine>>,
}

impl PipelineController {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ArtifactStore>,
        runner: Arc<dyn StepRunner>,
        adapter: Arc<dyn ActionAdapter>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            adapter,
            output: None,
        }
    }

    /// Stream step output lines to `tx` as they are produced.
    pub fn with_output(mut self, tx: mpsc::Sender<OutputLine>) -> Self {
        self.output = Some(tx);
        self
    }

    /// Load, validate, and run a pipeline file.
    pub async fn run_file(
        &self,
        path: &Path,
        trigger: &TriggerContext,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let content = tokio::fs::read_to_string(path).await?;
        let definition = PipelineDefinition::from_yaml(&content)?;
        self.run(&definition, trigger, cancel).await
    }

    /// Run a parsed definition to completion.
    ///
    /// `Err` means the definition never started (config error); a
    /// returned report covers every instance, including skips.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();
        let start = std::time::Instant::now();

        let graph = GraphBuilder::new().build(definition, trigger)?;
        info!(
            run_id = %run_id,
            pipeline = %definition.name,
            instances = graph.node_count(),
            "run started"
        );

        let executor = Arc::new(InstanceExecutor::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.adapter),
            Arc::clone(&self.store),
            self.config.workspace.clone(),
            self.config.artifact_timeout,
            trigger.clone(),
            definition.env.clone(),
            self.output.clone(),
        ));

        let scheduler = Scheduler::new(executor, trigger.clone(), self.config.max_parallel);
        let instances = scheduler.run(&graph, cancel.clone()).await;

        let cancelled = cancel.is_cancelled()
            || instances
                .iter()
                .any(|i| i.error_kind == Some(ErrorKind::Cancelled));
        let failed = instances.iter().any(|i| i.state == InstanceState::Failed);

        let status = if cancelled {
            RunStatus::Cancelled
        } else if failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let report = RunReport {
            run_id,
            pipeline: definition.name.clone(),
            status,
            instances,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            run_id = %report.run_id,
            status = ?report.status,
            duration_ms = report.duration_ms,
            "run finished"
        );
        Ok(report)
    }

    /// Validate a definition without running anything: parse checks
    /// already happened, this exercises graph construction.
    pub fn validate(
        &self,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
    ) -> Result<GraphSummary> {
        let graph = GraphBuilder::new().build(definition, trigger)?;
        Ok(summarize(&graph))
    }
}

/// Shape of a materialized graph, for validate/graph commands.
#[derive(Debug, Clone)]
pub struct GraphSummary {
    pub instances: Vec<GraphNode>,
    pub edge_count: usize,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub job_name: String,
    pub needs: Vec<String>,
    pub uploads: Vec<String>,
    pub downloads: Vec<String>,
}

fn summarize(graph: &crate::graph::JobGraph) -> GraphSummary {
    let needs_of: HashMap<String, Vec<String>> = graph
        .node_indices()
        .map(|idx| {
            let mut needs: Vec<String> = graph
                .predecessors(idx)
                .into_iter()
                .map(|p| graph.instance(p).id.to_string())
                .collect();
            needs.sort();
            (graph.instance(idx).id.to_string(), needs)
        })
        .collect();

    GraphSummary {
        instances: graph
            .instances()
            .map(|i| GraphNode {
                id: i.id.to_string(),
                job_name: i.job_name.clone(),
                needs: needs_of.get(i.id.as_str()).cloned().unwrap_or_default(),
                uploads: i.uploads.clone(),
                downloads: i.downloads.clone(),
            })
            .collect(),
        edge_count: graph.edge_count(),
    }
}
