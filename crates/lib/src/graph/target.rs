//! Targets: named build phases and their actions.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::context::ExecutionContext;
use crate::exec::CommandInvocation;
use crate::matrix::ConfigurationEntry;
use crate::package::{PackageBatch, ParameterFile};
use crate::placeholder::PlaceholderError;

/// How a target is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
  /// The action runs once.
  Sequential,
  /// The action runs once per listed configuration, concurrently.
  MatrixParallel { configs: Vec<String> },
}

impl TargetKind {
  pub fn is_matrix(&self) -> bool {
    matches!(self, TargetKind::MatrixParallel { .. })
  }
}

/// One unit of work produced by an action.
#[derive(Debug, Clone)]
pub enum Step {
  /// Run an external command.
  Command(CommandInvocation),
  /// Assemble a batch of packages with the scheduler's packaging backend.
  Package(PackageBatch),
  /// Write a `key=value` parameter file.
  Params { path: PathBuf, params: ParameterFile },
}

impl Step {
  /// One-line description used in logs and the session report.
  pub fn describe(&self) -> String {
    match self {
      Step::Command(cmd) => cmd.to_string(),
      Step::Package(batch) => {
        let names: Vec<_> = batch.packages.iter().map(|p| p.name.as_str()).collect();
        format!("package {} ({})", names.join(" "), batch.release.full_version())
      }
      Step::Params { path, .. } => format!("write parameters {}", path.display()),
    }
  }
}

impl From<CommandInvocation> for Step {
  fn from(cmd: CommandInvocation) -> Self {
    Step::Command(cmd)
  }
}

/// Errors raised while an action computes its steps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("{0}")]
  Invalid(String),
}

/// The behaviour of a target.
///
/// An action only sees the run context and, for matrix targets, the
/// configuration entry being expanded. It returns data (the steps to run);
/// the scheduler executes them. Plain functions and closures implement it.
pub trait Action: Send + Sync {
  fn steps(&self, ctx: &ExecutionContext, entry: Option<&ConfigurationEntry>) -> Result<Vec<Step>, ActionError>;
}

impl<F> Action for F
where
  F: Fn(&ExecutionContext, Option<&ConfigurationEntry>) -> Result<Vec<Step>, ActionError> + Send + Sync,
{
  fn steps(&self, ctx: &ExecutionContext, entry: Option<&ConfigurationEntry>) -> Result<Vec<Step>, ActionError> {
    self(ctx, entry)
  }
}

/// Wrap a closure as an [`Action`], fixing its signature so argument and
/// return types are inferred at the call site.
pub fn action_fn<F>(f: F) -> F
where
  F: Fn(&ExecutionContext, Option<&ConfigurationEntry>) -> Result<Vec<Step>, ActionError> + Send + Sync,
{
  f
}

/// A named build phase.
#[derive(Clone)]
pub struct Target {
  pub name: String,
  pub deps: Vec<String>,
  pub kind: TargetKind,
  /// Heading of this target's section in the session report.
  pub title: Option<String>,
  /// A tolerant target that fails is reported as tolerated and does not
  /// block its dependents.
  pub tolerant: bool,
  pub action: Arc<dyn Action>,
}

impl Target {
  pub fn sequential(name: impl Into<String>, action: impl Action + 'static) -> Self {
    Self {
      name: name.into(),
      deps: Vec::new(),
      kind: TargetKind::Sequential,
      title: None,
      tolerant: false,
      action: Arc::new(action),
    }
  }

  pub fn matrix<I, S>(name: impl Into<String>, configs: I, action: impl Action + 'static) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      kind: TargetKind::MatrixParallel {
        configs: configs.into_iter().map(Into::into).collect(),
      },
      ..Self::sequential(name, action)
    }
  }

  pub fn deps<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.deps = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = Some(title.into());
    self
  }

  pub fn tolerant(mut self, tolerant: bool) -> Self {
    self.tolerant = tolerant;
    self
  }
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Target")
      .field("name", &self.name)
      .field("deps", &self.deps)
      .field("kind", &self.kind)
      .field("title", &self.title)
      .field("tolerant", &self.tolerant)
      .finish_non_exhaustive()
  }
}
