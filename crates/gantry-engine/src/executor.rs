//! Single-instance execution.
//!
//! The executor walks an instance's steps strictly in order: resolve
//! the step gate, satisfy downloads, run the body through the runner
//! or action adapter, then publish uploads. The scheduler owns
//! parallelism; this module never runs two steps concurrently.

use crate::graph::JobInstance;
use gantry_core::expr::{self, EvalContext, NeedsOutcome};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::pipeline::StepSpec;
use gantry_core::ports::{ActionAdapter, ArtifactStore, OutputLine, StepContext, StepRunner};
use gantry_core::trigger::TriggerContext;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes the steps of one job instance.
pub struct InstanceExecutor {
    runner: Arc<dyn StepRunner>,
    adapter: Arc<dyn ActionAdapter>,
    store: Arc<dyn ArtifactStore>,
    workspace: PathBuf,
    artifact_timeout: Duration,
    trigger: TriggerContext,
    pipeline_env: HashMap<String, String>,
    output: Option<mpsc::Sender<OutputLine>>,
}

impl InstanceExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<dyn StepRunner>,
        adapter: Arc<dyn ActionAdapter>,
        store: Arc<dyn ArtifactStore>,
        workspace: PathBuf,
        artifact_timeout: Duration,
        trigger: TriggerContext,
        pipeline_env: HashMap<String, String>,
        output: Option<mpsc::Sender<OutputLine>>,
    ) -> Self {
        Self {
            runner,
            adapter,
            store,
            workspace,
            artifact_timeout,
            trigger,
            pipeline_env,
            output,
        }
    }

    /// Run every step of `instance` in declaration order.
    ///
    /// The first failing step (absent `continue_on_error`) aborts the
    /// instance; later steps do not run.
    pub async fn execute(
        &self,
        instance: &JobInstance,
        needs: NeedsOutcome,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interp = self.interpolation_for(instance);
        let base_env = self.instance_env(instance, &interp);

        info!(instance = %instance.id, steps = instance.spec.steps.len(), "executing instance");

        for step in &instance.spec.steps {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if !self.step_gate_open(step, needs) {
                continue;
            }

            let step = resolve_step(step, &interp);
            let stdout = self.run_step(instance, &step, &base_env, &interp, cancel).await;

            match stdout {
                Ok(captured) => {
                    if let Some(decl) = &step.upload {
                        self.upload(instance, &interp, decl, captured).await?;
                    }
                }
                Err(err) if step.continue_on_error => {
                    warn!(instance = %instance.id, step = %step.name, error = %err,
                        "step failed, continuing");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Evaluate a step-level gate. An eval error skips just this step;
    /// the job-level gate already passed, so a bad step condition is
    /// not worth failing the whole instance over.
    fn step_gate_open(&self, step: &StepSpec, needs: NeedsOutcome) -> bool {
        let Some(condition) = &step.condition else {
            return true;
        };
        let ctx = EvalContext::new(&self.trigger, needs);
        match expr::evaluate(condition, &ctx) {
            Ok(open) => {
                if !open {
                    debug!(step = %step.name, condition, "step gate closed, skipping step");
                }
                open
            }
            Err(err) => {
                warn!(step = %step.name, condition, error = %err,
                    "step condition failed to evaluate, skipping step");
                false
            }
        }
    }

    /// Run one step body, returning the captured stdout.
    async fn run_step(
        &self,
        instance: &JobInstance,
        step: &StepSpec,
        base_env: &HashMap<String, String>,
        interp: &InterpolationContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if let Some(decl) = &step.download {
            self.download(instance, interp, decl).await?;
        }

        let mut env = base_env.clone();
        for (key, value) in &step.env {
            env.insert(key.clone(), interp.interpolate(value));
        }

        let workspace = match &step.working_directory {
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.clone(),
        };

        let ctx = StepContext {
            workspace,
            env,
            step: step.clone(),
        };

        if let Some(action) = &step.uses {
            let outcome = self.adapter.invoke(action, &step.with, &ctx).await?;
            if !outcome.success() {
                return Err(Error::ActionFailed {
                    action: action.clone(),
                    message: format!("exited with code {}", outcome.exit_code),
                });
            }
            return Ok(outcome.stdout.into_bytes());
        }

        if step.run.is_none() {
            // Pure upload/download step; nothing to execute.
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
        let sink = self.output.clone();
        let collector = tokio::spawn(async move {
            let mut captured = Vec::new();
            while let Some(line) = rx.recv().await {
                if line.stream == gantry_core::ports::OutputStream::Stdout {
                    captured.extend_from_slice(line.content.as_bytes());
                    captured.push(b'\n');
                }
                if let Some(sink) = &sink {
                    let _ = sink.send(line).await;
                }
            }
            captured
        });

        let outcome = tokio::select! {
            outcome = self.runner.execute(&ctx, tx) => outcome?,
            _ = cancel.cancelled() => {
                info!(instance = %instance.id, step = %step.name, "step cancelled");
                return Err(Error::Cancelled);
            }
        };

        let captured = collector
            .await
            .map_err(|e| Error::Internal(format!("output collector panicked: {}", e)))?;

        if !outcome.success {
            return Err(Error::StepFailed {
                step: step.name.clone(),
                exit_code: outcome.exit_code,
                message: format!("command exited with code {}", outcome.exit_code),
            });
        }

        debug!(instance = %instance.id, step = %step.name,
            duration_ms = outcome.duration_ms, "step succeeded");
        Ok(captured)
    }

    async fn download(
        &self,
        instance: &JobInstance,
        interp: &InterpolationContext,
        decl: &gantry_core::pipeline::ArtifactDecl,
    ) -> Result<()> {
        let name = interp.interpolate(&decl.name);
        debug!(instance = %instance.id, artifact = %name, "waiting for artifact");

        let bytes = self.store.wait(&name, self.artifact_timeout).await?;

        if let Some(path) = &decl.path {
            let target = self.workspace.join(interp.interpolate(path));
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &bytes).await?;
            debug!(artifact = %name, path = %target.display(), "artifact written");
        }
        Ok(())
    }

    async fn upload(
        &self,
        instance: &JobInstance,
        interp: &InterpolationContext,
        decl: &gantry_core::pipeline::ArtifactDecl,
        captured_stdout: Vec<u8>,
    ) -> Result<()> {
        let name = interp.interpolate(&decl.name);

        // A declared path is read from disk; without one the step's
        // captured stdout becomes the artifact body.
        let bytes = match &decl.path {
            Some(path) => tokio::fs::read(self.workspace.join(interp.interpolate(path))).await?,
            None => captured_stdout,
        };

        let handle = self.store.put(&name, &instance.id, bytes).await?;
        info!(instance = %instance.id, artifact = %name, sha256 = %handle.sha256,
            size = handle.size, "artifact uploaded");
        Ok(())
    }

    fn interpolation_for(&self, instance: &JobInstance) -> InterpolationContext {
        let mut env = self.pipeline_env.clone();
        env.extend(instance.spec.env.clone());

        let mut interp = InterpolationContext::new().with_trigger(&self.trigger);
        interp.matrix = instance.cell.to_map();
        interp.env = env;
        interp
    }

    /// Environment every step of the instance sees: pipeline env, then
    /// job env, then the trigger and matrix context variables.
    fn instance_env(
        &self,
        instance: &JobInstance,
        interp: &InterpolationContext,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .pipeline_env
            .iter()
            .map(|(k, v)| (k.clone(), interp.interpolate(v)))
            .collect();
        for (key, value) in &instance.spec.env {
            env.insert(key.clone(), interp.interpolate(value));
        }

        env.insert("GANTRY_REF".to_string(), self.trigger.short_ref().to_string());
        env.insert(
            "GANTRY_EVENT".to_string(),
            self.trigger.event.as_str().to_string(),
        );
        for (axis, value) in instance.cell.bindings() {
            env.insert(
                format!("GANTRY_MATRIX_{}", axis.to_ascii_uppercase().replace('-', "_")),
                value.clone(),
            );
        }
        env
    }
}

fn resolve_step(step: &StepSpec, interp: &InterpolationContext) -> StepSpec {
    let mut resolved = step.clone();
    resolved.run = step.run.as_ref().map(|r| interp.interpolate(r));
    resolved.working_directory = step
        .working_directory
        .as_ref()
        .map(|d| interp.interpolate(d));
    resolved
}
