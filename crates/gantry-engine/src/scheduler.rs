//! Parallel instance scheduling.
//!
//! The scheduler drives the job graph to completion: instances whose
//! prerequisites are all terminal get their gate evaluated, gated-in
//! instances run on the executor under a concurrency limit, and
//! skips propagate through the default `success()` gate. Instance
//! state only ever moves forward.

use crate::executor::InstanceExecutor;
use crate::graph::JobGraph;
use gantry_core::expr::{self, DEFAULT_CONDITION, EvalContext, NeedsOutcome};
use gantry_core::run::{InstanceReport, InstanceState};
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, ErrorKind};
use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-instance bookkeeping while the run is in flight.
struct Slot {
    state: InstanceState,
    error_kind: Option<ErrorKind>,
    message: Option<String>,
    duration_ms: Option<u64>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: InstanceState::Pending,
            error_kind: None,
            message: None,
            duration_ms: None,
        }
    }

    fn advance(&mut self, next: InstanceState) {
        if self.state.may_become(next) {
            self.state = next;
        }
    }
}

pub struct Scheduler {
    executor: Arc<InstanceExecutor>,
    trigger: TriggerContext,
    max_parallel: usize,
}

impl Scheduler {
    pub fn new(
        executor: Arc<InstanceExecutor>,
        trigger: TriggerContext,
        max_parallel: usize,
    ) -> Self {
        Self {
            executor,
            trigger,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Drive every instance of `graph` to a terminal state and return
    /// the reports in materialization order.
    pub async fn run(&self, graph: &JobGraph, cancel: CancellationToken) -> Vec<InstanceReport> {
        let mut slots: HashMap<NodeIndex, Slot> = graph
            .node_indices()
            .map(|idx| (idx, Slot::new()))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut running: JoinSet<(NodeIndex, std::result::Result<(), Error>, u64)> =
            JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                self.skip_waiting(graph, &mut slots);
            } else {
                self.gate_pass(graph, &mut slots);
                self.dispatch_pass(graph, &mut slots, &semaphore, &mut running, &cancel);
            }

            if running.is_empty() {
                if slots.values().all(|s| s.state.is_terminal()) {
                    break;
                }
                // Nothing running, nothing dispatchable yet: another
                // gate pass will settle the remaining instances.
                continue;
            }

            if let Some(joined) = running.join_next().await {
                match joined {
                    Ok((idx, outcome, duration_ms)) => {
                        self.record_outcome(graph, &mut slots, idx, outcome, duration_ms);
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "instance task panicked");
                    }
                }
            }
        }

        graph
            .node_indices()
            .map(|idx| {
                let slot = &slots[&idx];
                InstanceReport {
                    id: graph.instance(idx).id.clone(),
                    state: slot.state,
                    error_kind: slot.error_kind,
                    message: slot.message.clone(),
                    duration_ms: slot.duration_ms,
                }
            })
            .collect()
    }

    /// Move instances whose prerequisites have settled to Ready or
    /// Skipped, per their gate condition.
    fn gate_pass(&self, graph: &JobGraph, slots: &mut HashMap<NodeIndex, Slot>) {
        for idx in graph.node_indices() {
            if !matches!(
                slots[&idx].state,
                InstanceState::Pending | InstanceState::Blocked
            ) {
                continue;
            }

            let preds = graph.predecessors(idx);
            let needs = match aggregate(&preds, slots) {
                Some(needs) => needs,
                None => {
                    if !preds.is_empty()
                        && let Some(slot) = slots.get_mut(&idx)
                    {
                        slot.advance(InstanceState::Blocked);
                    }
                    continue;
                }
            };

            let instance = graph.instance(idx);
            let condition = instance
                .spec
                .condition
                .as_deref()
                .unwrap_or(DEFAULT_CONDITION);
            let ctx = EvalContext::new(&self.trigger, needs);

            let Some(slot) = slots.get_mut(&idx) else {
                continue;
            };
            match expr::evaluate(condition, &ctx) {
                Ok(true) => {
                    debug!(instance = %instance.id, "gate open");
                    slot.advance(InstanceState::Ready);
                }
                Ok(false) => {
                    info!(instance = %instance.id, condition, "gate closed, skipping");
                    slot.message = Some(if needs.all_succeeded() {
                        format!("condition '{}' evaluated to false", condition)
                    } else {
                        "skipped: a prerequisite did not succeed".to_string()
                    });
                    slot.advance(InstanceState::Skipped);
                }
                Err(err) => {
                    warn!(instance = %instance.id, condition, error = %err,
                        "gate failed to evaluate, skipping");
                    slot.error_kind = Some(ErrorKind::Eval);
                    slot.message = Some(err.to_string());
                    slot.advance(InstanceState::Skipped);
                }
            }
        }
    }

    /// Start Ready instances while permits remain.
    fn dispatch_pass(
        &self,
        graph: &JobGraph,
        slots: &mut HashMap<NodeIndex, Slot>,
        semaphore: &Arc<Semaphore>,
        running: &mut JoinSet<(NodeIndex, std::result::Result<(), Error>, u64)>,
        cancel: &CancellationToken,
    ) {
        for idx in graph.node_indices() {
            if slots[&idx].state != InstanceState::Ready {
                continue;
            }
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                break;
            };

            if let Some(slot) = slots.get_mut(&idx) {
                slot.advance(InstanceState::Running);
            }

            let preds = graph.predecessors(idx);
            let needs = aggregate(&preds, slots).unwrap_or_default();
            let instance = graph.instance(idx).clone();
            let executor = Arc::clone(&self.executor);
            let cancel = cancel.clone();

            info!(instance = %instance.id, "instance started");
            running.spawn(async move {
                let _permit = permit;
                let start = std::time::Instant::now();
                let outcome = executor.execute(&instance, needs, &cancel).await;
                (idx, outcome, start.elapsed().as_millis() as u64)
            });
        }
    }

    fn record_outcome(
        &self,
        graph: &JobGraph,
        slots: &mut HashMap<NodeIndex, Slot>,
        idx: NodeIndex,
        outcome: std::result::Result<(), Error>,
        duration_ms: u64,
    ) {
        let id = &graph.instance(idx).id;
        let Some(slot) = slots.get_mut(&idx) else {
            return;
        };
        slot.duration_ms = Some(duration_ms);

        match outcome {
            Ok(()) => {
                info!(instance = %id, duration_ms, "instance succeeded");
                slot.advance(InstanceState::Succeeded);
            }
            Err(Error::Cancelled) => {
                info!(instance = %id, "instance cancelled");
                slot.error_kind = Some(ErrorKind::Cancelled);
                slot.message = Some("run cancelled".to_string());
                slot.advance(InstanceState::Skipped);
            }
            Err(err) => {
                warn!(instance = %id, error = %err, "instance failed");
                slot.error_kind = Some(err.kind());
                slot.message = Some(err.to_string());
                slot.advance(InstanceState::Failed);
            }
        }
    }

    /// On cancellation every instance that has not started is skipped;
    /// running instances settle through their own cancel check.
    fn skip_waiting(&self, graph: &JobGraph, slots: &mut HashMap<NodeIndex, Slot>) {
        for idx in graph.node_indices() {
            let Some(slot) = slots.get_mut(&idx) else {
                continue;
            };
            if slot.state.is_terminal() || slot.state == InstanceState::Running {
                continue;
            }
            slot.error_kind = Some(ErrorKind::Cancelled);
            slot.message = Some("run cancelled".to_string());
            slot.advance(InstanceState::Skipped);
        }
    }
}

/// Aggregate prerequisite outcomes, `None` while any is still pending.
fn aggregate(preds: &[NodeIndex], slots: &HashMap<NodeIndex, Slot>) -> Option<NeedsOutcome> {
    let mut outcome = NeedsOutcome {
        total: preds.len(),
        failed: 0,
        skipped: 0,
    };
    for idx in preds {
        match slots[idx].state {
            InstanceState::Succeeded => {}
            InstanceState::Failed => outcome.failed += 1,
            InstanceState::Skipped => outcome.skipped += 1,
            _ => return None,
        }
    }
    Some(outcome)
}
