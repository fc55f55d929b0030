//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline to completion
    Run {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        /// Ref the run is for, e.g. main or refs/tags/v1.2.0
        #[arg(short = 'r', long, env = "GANTRY_REF")]
        r#ref: Option<String>,

        /// Trigger event: push, pull_request, or manual
        #[arg(short, long, env = "GANTRY_EVENT")]
        event: Option<String>,

        /// Maximum concurrently running instances
        #[arg(short = 'j', long)]
        max_parallel: Option<usize>,

        /// Directory step commands run in
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Persist artifacts to this directory instead of memory
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Print step output as it is produced
        #[arg(long)]
        stream: bool,

        /// Emit the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a pipeline file without running it
    Validate {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        /// Ref used when materializing the graph
        #[arg(short = 'r', long, env = "GANTRY_REF")]
        r#ref: Option<String>,
    },

    /// Print the materialized instance graph
    Graph {
        /// Path to pipeline file
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,

        /// Ref used when materializing the graph
        #[arg(short = 'r', long, env = "GANTRY_REF")]
        r#ref: Option<String>,
    },
}
