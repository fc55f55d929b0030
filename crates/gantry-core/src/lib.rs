//! Gantry Core
//!
//! Core domain types, traits, and error handling for the Gantry
//! pipeline orchestration engine. This crate has minimal dependencies
//! and defines the shared vocabulary used across all other crates.

pub mod artifact;
pub mod error;
pub mod expr;
pub mod ids;
pub mod interpolation;
pub mod pipeline;
pub mod ports;
pub mod run;
pub mod trigger;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
