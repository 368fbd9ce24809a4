//! phasegraph-lib: CI orchestration core
//!
//! This crate provides the pieces a CI driver is assembled from:
//! - `TargetGraph`: named build phases and their dependencies
//! - `ConfigRegistry`: the configuration matrix targets fan out over
//! - `Scheduler`: runs targets in dependency order, matrix entries in parallel
//! - `SessionReport`: per-target, per-configuration command output
//! - `package`: versioned package assembly from built artifacts

pub mod context;
pub mod exec;
pub mod graph;
pub mod matrix;
pub mod package;
pub mod pipeline;
pub mod placeholder;
pub mod repo;
pub mod report;
pub mod schedule;
pub mod util;
