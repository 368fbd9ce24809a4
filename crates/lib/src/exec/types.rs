//! Command invocation and result types.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::env::{EnvOverlay, EnvOverride};

/// What a non-zero exit means for the owning target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
  /// Non-zero exit fails the owning target (or matrix entry).
  #[default]
  Strict,
  /// Non-zero exit is logged as a warning and execution continues.
  Tolerant,
}

/// One external command, fully described as data.
///
/// Built with a small builder so the failure policy is explicit per call
/// rather than encoded in the command text:
///
/// ```
/// use phasegraph_lib::exec::{CommandInvocation, FailurePolicy};
///
/// let clean = CommandInvocation::new("make").args(["-C", "syscall", "clean"]).tolerant();
/// assert_eq!(clean.policy, FailurePolicy::Tolerant);
/// assert_eq!(clean.to_string(), "make -C syscall clean");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: EnvOverlay,
  /// Working directory. Relative paths are resolved against the run's
  /// working directory; `None` means the unit's default directory.
  pub cwd: Option<PathBuf>,
  pub policy: FailurePolicy,
}

impl CommandInvocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: EnvOverlay::new(),
      cwd: None,
      policy: FailurePolicy::Strict,
    }
  }

  /// A command line interpreted by `/bin/sh -c` (or `cmd /C` on Windows).
  pub fn shell(line: impl Into<String>) -> Self {
    #[cfg(unix)]
    {
      Self::new("/bin/sh").arg("-c").arg(line)
    }
    #[cfg(windows)]
    {
      Self::new("cmd.exe").arg("/C").arg(line)
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key, EnvOverride::Set(value.into()));
    self
  }

  pub fn env_prepend(mut self, key: impl Into<String>, prefix: impl Into<String>) -> Self {
    self.env.insert(key, EnvOverride::Prepend(prefix.into()));
    self
  }

  pub fn overlay(mut self, overlay: EnvOverlay) -> Self {
    self.env = overlay;
    self
  }

  pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn policy(mut self, policy: FailurePolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn tolerant(self) -> Self {
    self.policy(FailurePolicy::Tolerant)
  }
}

impl fmt::Display for CommandInvocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " {arg:?}")?;
      } else {
        write!(f, " {arg}")?;
      }
    }
    Ok(())
  }
}

/// How a finished invocation is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
  Succeeded,
  /// Non-zero exit under [`FailurePolicy::Tolerant`].
  Tolerated,
  Failed,
}

/// Captured result of one invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub command: String,
  pub exit_code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  pub duration: Duration,
  pub outcome: CommandOutcome,
}

/// Errors raised by the command runner under the strict policy.
#[derive(Debug, Error)]
pub enum CommandError {
  /// Command returned a non-zero exit status.
  #[error("command failed with exit code {code:?}: {command}")]
  Failed {
    command: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
    duration: Duration,
  },

  /// The process could not be started.
  #[error("failed to spawn {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  /// The working directory could not be created.
  #[error("failed to create working directory {path}: {source}")]
  Workdir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}
