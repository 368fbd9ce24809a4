//! Session report.
//!
//! Every run has one named session. Each executed target contributes a
//! section holding its terminal state and, per unit (one per configuration
//! for matrix targets), the ordered output of every command it ran. Blocked
//! targets appear too, with the dependency that blocked them.
//!
//! The report is persisted as `<session>.json` and a plain-text
//! `<session>.log` next to it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::exec::{CommandError, CommandOutcome, CommandOutput};
use crate::util::fs::write_atomic;

#[derive(Debug, Error)]
pub enum ReportError {
  #[error("failed to write report {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize report: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Terminal state of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TargetState {
  Succeeded,
  /// A tolerant target failed; dependents still run.
  Tolerated,
  Failed,
  /// Never started because a dependency failed or was blocked.
  Blocked { by: String },
}

impl TargetState {
  /// Whether dependents of a target in this state must not run.
  pub fn blocks_dependents(&self) -> bool {
    matches!(self, TargetState::Failed | TargetState::Blocked { .. })
  }

  pub fn label(&self) -> &'static str {
    match self {
      TargetState::Succeeded => "succeeded",
      TargetState::Tolerated => "tolerated",
      TargetState::Failed => "failed",
      TargetState::Blocked { .. } => "blocked",
    }
  }
}

/// Terminal state of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
  Succeeded,
  Failed,
  /// Not started because a sibling failed under the fail-fast policy.
  Cancelled,
}

/// Captured output of one command (or other step) of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
  pub command: String,
  pub exit_code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  pub outcome: CommandOutcome,
  pub duration_ms: u64,
}

impl CommandRecord {
  /// Record for a step that is not an external command.
  pub fn internal(description: impl Into<String>, output: impl Into<String>) -> Self {
    Self {
      command: description.into(),
      exit_code: None,
      stdout: output.into(),
      stderr: String::new(),
      outcome: CommandOutcome::Succeeded,
      duration_ms: 0,
    }
  }

  /// Record for a strict command that exited non-zero; `None` for other
  /// command errors, which have no output to keep.
  pub fn from_error(err: &CommandError) -> Option<Self> {
    match err {
      CommandError::Failed {
        command,
        code,
        stdout,
        stderr,
        duration,
      } => Some(Self {
        command: command.clone(),
        exit_code: *code,
        stdout: stdout.clone(),
        stderr: stderr.clone(),
        outcome: CommandOutcome::Failed,
        duration_ms: duration.as_millis() as u64,
      }),
      _ => None,
    }
  }
}

impl From<CommandOutput> for CommandRecord {
  fn from(output: CommandOutput) -> Self {
    Self {
      duration_ms: output.duration.as_millis() as u64,
      command: output.command,
      exit_code: output.exit_code,
      stdout: output.stdout,
      stderr: output.stderr,
      outcome: output.outcome,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
  /// Configuration identifier, `None` for sequential targets.
  pub configuration: Option<String>,
  pub state: UnitState,
  pub commands: Vec<CommandRecord>,
  pub error: Option<String>,
}

impl UnitReport {
  pub fn cancelled(configuration: Option<String>) -> Self {
    Self {
      configuration,
      state: UnitState::Cancelled,
      commands: Vec::new(),
      error: None,
    }
  }

  /// A unit that failed before running any command.
  pub fn failed(configuration: Option<String>, error: impl Into<String>) -> Self {
    Self {
      configuration,
      state: UnitState::Failed,
      commands: Vec::new(),
      error: Some(error.into()),
    }
  }

  /// Commands of this unit that failed under the tolerant policy.
  pub fn tolerated(&self) -> impl Iterator<Item = &CommandRecord> {
    self
      .commands
      .iter()
      .filter(|c| c.outcome == CommandOutcome::Tolerated)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
  pub name: String,
  pub title: Option<String>,
  pub matrix: bool,
  #[serde(flatten)]
  pub state: TargetState,
  pub units: Vec<UnitReport>,
}

impl TargetReport {
  /// Section heading: the target's title or a generated one.
  pub fn heading(&self) -> String {
    self
      .title
      .clone()
      .unwrap_or_else(|| format!("Report for {}.", self.name))
  }

  /// Unit reports of this target for `configuration`.
  pub fn unit(&self, configuration: &str) -> Option<&UnitReport> {
    self
      .units
      .iter()
      .find(|u| u.configuration.as_deref() == Some(configuration))
  }
}

/// Consolidated report of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
  pub session: String,
  pub started_at_unix: u64,
  pub targets: Vec<TargetReport>,
}

impl SessionReport {
  pub fn new(session: impl Into<String>) -> Self {
    let started_at_unix = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    Self {
      session: session.into(),
      started_at_unix,
      targets: Vec::new(),
    }
  }

  pub fn push(&mut self, target: TargetReport) {
    self.targets.push(target);
  }

  pub fn target(&self, name: &str) -> Option<&TargetReport> {
    self.targets.iter().find(|t| t.name == name)
  }

  /// True when no target failed or was blocked.
  pub fn is_success(&self) -> bool {
    !self.targets.iter().any(|t| t.state.blocks_dependents())
  }

  /// Targets that failed or were blocked.
  pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
    self.targets.iter().filter(|t| t.state.blocks_dependents())
  }

  /// Number of commands whose failure was tolerated.
  pub fn tolerated_count(&self) -> usize {
    self
      .targets
      .iter()
      .flat_map(|t| &t.units)
      .map(|u| u.tolerated().count())
      .sum()
  }

  /// Plain-text rendering: one section per target, commands in run order.
  pub fn render_text(&self) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "session {}", self.session);

    for target in &self.targets {
      let _ = writeln!(out);
      let _ = writeln!(out, "=== {} [{}]", target.heading(), target.state.label());
      if let TargetState::Blocked { by } = &target.state {
        let _ = writeln!(out, "blocked by {by}");
      }

      for unit in &target.units {
        let state = match unit.state {
          UnitState::Succeeded => "succeeded",
          UnitState::Failed => "failed",
          UnitState::Cancelled => "cancelled",
        };
        match &unit.configuration {
          Some(config) => {
            let _ = writeln!(out, "--- {config} [{state}]");
          }
          None => {
            let _ = writeln!(out, "--- [{state}]");
          }
        }

        for cmd in &unit.commands {
          let suffix = match (cmd.outcome, cmd.exit_code) {
            (CommandOutcome::Succeeded, _) => String::new(),
            (CommandOutcome::Tolerated, code) => format!(" (tolerated, exit {})", exit_label(code)),
            (CommandOutcome::Failed, code) => format!(" (failed, exit {})", exit_label(code)),
          };
          let _ = writeln!(out, "$ {}{suffix}", cmd.command);
          push_block(&mut out, &cmd.stdout);
          push_block(&mut out, &cmd.stderr);
        }

        if let Some(error) = &unit.error {
          let _ = writeln!(out, "error: {error}");
        }
      }
    }

    out
  }

  /// Write `<session>.json` and `<session>.log` into `dir` and return the
  /// JSON path.
  pub fn persist(&self, dir: &Path) -> Result<PathBuf, ReportError> {
    let json_path = dir.join(format!("{}.json", self.session));
    let log_path = dir.join(format!("{}.log", self.session));

    let json = serde_json::to_vec_pretty(self)?;
    write_atomic(&json_path, json).map_err(|source| ReportError::Io {
      path: json_path.clone(),
      source,
    })?;
    write_atomic(&log_path, self.render_text()).map_err(|source| ReportError::Io {
      path: log_path.clone(),
      source,
    })?;

    info!(path = %json_path.display(), "session report written");
    Ok(json_path)
  }
}

fn exit_label(code: Option<i32>) -> String {
  code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

fn push_block(out: &mut String, text: &str) {
  if text.is_empty() {
    return;
  }
  out.push_str(text);
  if !text.ends_with('\n') {
    out.push('\n');
  }
}
