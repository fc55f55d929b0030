//! External-action adapter.
//!
//! Actions are opaque executables the engine shells out to: registry
//! publishers, formula bumpers, changelog generators. The adapter
//! passes the recognized config options through the environment and
//! reports only the exit code and captured stdout.

use async_trait::async_trait;
use gantry_core::pipeline::ActionConfig;
use gantry_core::ports::{ActionAdapter, ActionOutcome, StepContext};
use gantry_core::{Error, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Resolves an action name to an executable under `actions_dir` and
/// invokes it as a child process.
pub struct CommandActionAdapter {
    actions_dir: PathBuf,
}

impl CommandActionAdapter {
    pub fn new(actions_dir: impl Into<PathBuf>) -> Self {
        Self {
            actions_dir: actions_dir.into(),
        }
    }
}

/// Action option keys become `GANTRY_INPUT_<KEY>` env vars, uppercased
/// with dashes folded to underscores.
fn input_var(key: &str) -> String {
    let mut name = String::from("GANTRY_INPUT_");
    for c in key.chars() {
        if c == '-' {
            name.push('_');
        } else {
            name.push(c.to_ascii_uppercase());
        }
    }
    name
}

#[async_trait]
impl ActionAdapter for CommandActionAdapter {
    async fn invoke(
        &self,
        action: &str,
        config: &ActionConfig,
        ctx: &StepContext,
    ) -> Result<ActionOutcome> {
        let executable = self.actions_dir.join(action);
        if !executable.is_file() {
            return Err(Error::ActionFailed {
                action: action.to_string(),
                message: format!("no executable at {}", executable.display()),
            });
        }

        let working_dir = config
            .working_directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| ctx.workspace.clone());

        let mut cmd = Command::new(&executable);
        cmd.current_dir(&working_dir);
        cmd.envs(&ctx.env);
        cmd.envs(&config.env);
        if let Some(version) = &config.version {
            cmd.env("GANTRY_ACTION_VERSION", version);
        }
        for (key, value) in &config.options {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            cmd.env(input_var(key), text);
        }

        info!(action, executable = %executable.display(), "invoking action");

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::ActionFailed {
                action: action.to_string(),
                message: format!("failed to spawn: {}", e),
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(action, exit_code, "action completed");

        Ok(ActionOutcome {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}
