//! Step execution on the host.
//!
//! [`ShellRunner`] executes literal `run` bodies through the shell;
//! [`CommandActionAdapter`] resolves named external actions to
//! executables and invokes them with the recognized config options in
//! the environment.

mod action;
mod shell;

pub use action::CommandActionAdapter;
pub use shell::{RunnerConfig, ShellRunner};
