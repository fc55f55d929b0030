//! Gantry engine: matrix expansion, job graph construction, and
//! parallel scheduling.

pub mod controller;
pub mod executor;
pub mod graph;
pub mod matrix;
pub mod scheduler;

pub use controller::{ControllerConfig, GraphNode, GraphSummary, PipelineController};
pub use executor::InstanceExecutor;
pub use graph::{GraphBuilder, JobGraph, JobInstance};
pub use matrix::{MatrixCell, MatrixExpander};
pub use scheduler::Scheduler;
