//! Scheduler configuration and error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::CommandError;
use crate::graph::{ActionError, GraphError};
use crate::package::PackagingError;

/// What happens to the other entries of a matrix target when one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatrixPolicy {
  /// Every entry runs to completion regardless of its siblings.
  #[default]
  BestEffort,
  /// After the first failure, entries not yet started are cancelled.
  /// Entries already running finish normally.
  FailFast,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
  /// Upper bound on concurrently running matrix entries. `None` means one
  /// task per entry with no bound.
  pub jobs: Option<usize>,
  pub matrix_policy: MatrixPolicy,
}

/// Errors detected before any target runs.
#[derive(Debug, Error)]
pub enum ScheduleError {
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// Why a step of a unit failed.
#[derive(Debug, Error)]
pub enum StepError {
  #[error(transparent)]
  Action(#[from] ActionError),

  #[error(transparent)]
  Command(#[from] CommandError),

  #[error(transparent)]
  Packaging(#[from] PackagingError),

  #[error("failed to write {path}: {source}")]
  Write {
    path: std::path::PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("packaging task panicked: {0}")]
  Task(#[from] tokio::task::JoinError),
}
