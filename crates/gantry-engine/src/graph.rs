//! Job graph construction.
//!
//! The pipeline definition is materialized into a DAG of job instances
//! before anything executes: matrices are expanded, `needs` edges fan
//! out to every cell of the prerequisite, and the whole structure is
//! validated (unknown dependencies, cycles, artifact wiring) so that a
//! misconfigured pipeline aborts without running a single step.

use crate::matrix::{MatrixCell, MatrixExpander};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::pipeline::{JobSpec, PipelineDefinition};
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, InstanceId, Result};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One materialized unit of work: a job crossed with one matrix cell.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    pub job_name: String,
    pub spec: JobSpec,
    pub cell: MatrixCell,
    /// Artifact names this instance uploads, already interpolated.
    pub uploads: Vec<String>,
    /// Artifact names this instance downloads, already interpolated.
    pub downloads: Vec<String>,
}

/// Validated DAG of job instances. Node order is materialization
/// order: jobs as declared, cells in expansion order.
#[derive(Debug)]
pub struct JobGraph {
    graph: DiGraph<JobInstance, ()>,
}

impl JobGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn instance(&self, idx: NodeIndex) -> &JobInstance {
        &self.graph[idx]
    }

    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.graph.node_weights()
    }

    /// Direct prerequisites of `idx`.
    pub fn predecessors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect()
    }

    /// Direct dependents of `idx`.
    pub fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect()
    }
}

/// Builds and validates a [`JobGraph`] from a parsed definition.
pub struct GraphBuilder {
    expander: MatrixExpander,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            expander: MatrixExpander::new(),
        }
    }

    pub fn build(
        &self,
        definition: &PipelineDefinition,
        trigger: &TriggerContext,
    ) -> Result<JobGraph> {
        let mut graph: DiGraph<JobInstance, ()> = DiGraph::new();
        let mut by_job: HashMap<String, Vec<NodeIndex>> = HashMap::new();
        let mut seen_ids: HashSet<InstanceId> = HashSet::new();

        for (job_name, job) in &definition.jobs {
            let cells = self.expander.expand(job_name, job.matrix.as_ref())?;
            let mut nodes = Vec::with_capacity(cells.len());

            for cell in cells {
                let instance = materialize(definition, trigger, job_name, job, cell);
                if !seen_ids.insert(instance.id.clone()) {
                    return Err(Error::DuplicateJob(instance.id.to_string()));
                }
                debug!(instance = %instance.id, "materialized job instance");
                nodes.push(graph.add_node(instance));
            }

            by_job.insert(job_name.clone(), nodes);
        }

        // Every cell of a dependent waits on every cell of each
        // prerequisite.
        for (job_name, job) in &definition.jobs {
            for needed in &job.needs {
                let Some(sources) = by_job.get(needed) else {
                    return Err(Error::UnknownDependency {
                        job: job_name.clone(),
                        needs: needed.clone(),
                    });
                };
                for &target in &by_job[job_name] {
                    for &source in sources {
                        graph.add_edge(source, target, ());
                    }
                }
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let at = graph[cycle.node_id()].id.to_string();
            return Err(Error::DependencyCycle(at));
        }

        let built = JobGraph { graph };
        validate_artifacts(&built)?;
        Ok(built)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn materialize(
    definition: &PipelineDefinition,
    trigger: &TriggerContext,
    job_name: &str,
    job: &JobSpec,
    cell: MatrixCell,
) -> JobInstance {
    let mut env = definition.env.clone();
    env.extend(job.env.clone());

    let mut interp = InterpolationContext::new().with_trigger(trigger);
    interp.matrix = cell.to_map();
    interp.env = env;

    let mut uploads = Vec::new();
    let mut downloads = Vec::new();
    for step in &job.steps {
        if let Some(decl) = &step.upload {
            uploads.push(interp.interpolate(&decl.name));
        }
        if let Some(decl) = &step.download {
            downloads.push(interp.interpolate(&decl.name));
        }
    }

    JobInstance {
        id: InstanceId::for_cell(job_name, cell.bindings()),
        job_name: job_name.to_string(),
        spec: job.clone(),
        cell,
        uploads,
        downloads,
    }
}

/// Artifact wiring is checked statically: every name has exactly one
/// producer, and every consumer can reach its producer through `needs`
/// edges (otherwise the wait would deadlock or race).
fn validate_artifacts(graph: &JobGraph) -> Result<()> {
    let mut producers: HashMap<&str, NodeIndex> = HashMap::new();

    for idx in graph.node_indices() {
        for name in &graph.instance(idx).uploads {
            if let Some(&first) = producers.get(name.as_str()) {
                return Err(Error::DuplicateArtifact {
                    name: name.clone(),
                    first: graph.instance(first).id.to_string(),
                    second: graph.instance(idx).id.to_string(),
                });
            }
            producers.insert(name, idx);
        }
    }

    for idx in graph.node_indices() {
        let instance = graph.instance(idx);
        if instance.downloads.is_empty() {
            continue;
        }

        let mut ancestors = HashSet::new();
        let reversed = Reversed(&graph.graph);
        let mut dfs = Dfs::new(reversed, idx);
        while let Some(node) = dfs.next(reversed) {
            if node != idx {
                ancestors.insert(node);
            }
        }

        for name in &instance.downloads {
            match producers.get(name.as_str()) {
                Some(producer) if ancestors.contains(producer) => {}
                _ => {
                    return Err(Error::MissingArtifactProducer {
                        instance: instance.id.to_string(),
                        artifact: name.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
