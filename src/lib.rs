//! Dagsmith compiles layered ML pipeline configurations into Airflow DAGs.
//!
//! A pipeline is a list of stages. Each stage becomes one or more layers of
//! operator families, every operator gets a globally unique task id, and the
//! layers are chained into a dependency graph with a BLAKE3 fingerprint.

pub mod cli;
pub mod core;

pub use crate::core::assembler::{compile, compile_with};
pub use crate::core::error::{CompileError, Result};
