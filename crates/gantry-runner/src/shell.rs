//! Shell-based step execution on the host.

use async_trait::async_trait;
use gantry_core::ports::{OutputLine, OutputStream, StepContext, StepOutcome, StepRunner};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard ceiling applied when a step declares no timeout.
    pub default_timeout: Duration,
    /// Whether the parent process environment is visible to steps.
    pub inherit_env: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30 * 60),
            inherit_env: true,
        }
    }
}

/// Runs `run` step bodies via the step's shell.
pub struct ShellRunner {
    config: RunnerConfig,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    async fn execute_command(
        &self,
        command: &str,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepOutcome> {
        let start = std::time::Instant::now();

        info!(command = %command, workspace = %ctx.workspace.display(), "executing shell command");

        let mut env_vars: HashMap<String, String> = if self.config.inherit_env {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };
        env_vars.extend(ctx.env.clone());

        let mut child = Command::new(&ctx.step.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace)
            .env_clear()
            .envs(&env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Cancellation drops this future; the child must not
            // outlive it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn process: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let stdout_tx = output_tx.clone();
        let stdout_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut line_num = 0u32;
            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                let output = OutputLine {
                    stream: OutputStream::Stdout,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                if stdout_tx.send(output).await.is_err() {
                    break;
                }
            }
        });

        let stderr_tx = output_tx;
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut line_num = 0u32;
            while let Ok(Some(line)) = lines.next_line().await {
                line_num += 1;
                let output = OutputLine {
                    stream: OutputStream::Stderr,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                };
                if stderr_tx.send(output).await.is_err() {
                    break;
                }
            }
        });

        let step_timeout = if ctx.step.timeout_minutes > 0 {
            Duration::from_secs(ctx.step.timeout_minutes as u64 * 60)
        } else {
            self.config.default_timeout
        };

        let wait_result = match timeout(step_timeout, child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(step = %ctx.step.name, timeout_secs = step_timeout.as_secs(), "step timed out, killing process");
                let _ = child.kill().await;
                return Err(Error::StepFailed {
                    step: ctx.step.name.clone(),
                    exit_code: -1,
                    message: format!("timed out after {}s", step_timeout.as_secs()),
                });
            }
        };

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = wait_result
            .map_err(|e| Error::Internal(format!("failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "command completed");

        Ok(StepOutcome {
            exit_code,
            success: exit_code == 0,
            duration_ms,
        })
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn execute(
        &self,
        ctx: &StepContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<StepOutcome> {
        let command = ctx
            .step
            .run
            .as_ref()
            .ok_or_else(|| Error::Internal("step has no command to run".to_string()))?;
        self.execute_command(command, ctx, output_tx).await
    }
}
