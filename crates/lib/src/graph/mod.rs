//! Targets and the dependency graph between them.

pub mod dag;
pub mod target;

pub use dag::{GraphError, TargetGraph};
pub use target::{Action, ActionError, Step, Target, TargetKind, action_fn};
