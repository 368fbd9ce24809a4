//! Command execution: environment layering, invocations and the runner.

pub mod env;
pub mod runner;
pub mod types;

pub use env::{EnvOverlay, EnvOverride, layered, toolchain_overlay};
pub use runner::run_command;
pub use types::{CommandError, CommandInvocation, CommandOutcome, CommandOutput, FailurePolicy};
