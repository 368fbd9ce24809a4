//! Command runner.
//!
//! Executes one [`CommandInvocation`] against an [`ExecutionContext`]:
//! - starts from the context's environment snapshot (never the live process
//!   environment) with the invocation's overlay applied on top
//! - runs in the invocation's working directory, creating it if needed
//! - captures stdout and stderr separately and records the exit status
//! - applies the strict or tolerant failure policy

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;

use super::env::layered;
use super::types::{CommandError, CommandInvocation, CommandOutcome, CommandOutput, FailurePolicy};

/// Execute `invocation`.
///
/// `default_dir` is used when the invocation does not name a working
/// directory; matrix units pass their isolated build directory here.
///
/// # Errors
///
/// Under [`FailurePolicy::Strict`], a non-zero exit is
/// [`CommandError::Failed`] and a process that cannot be started is
/// [`CommandError::Spawn`]. Under [`FailurePolicy::Tolerant`] both are
/// returned as `Ok` with [`CommandOutcome::Tolerated`].
pub async fn run_command(
  invocation: &CommandInvocation,
  ctx: &ExecutionContext,
  default_dir: Option<&std::path::Path>,
) -> Result<CommandOutput, CommandError> {
  let command_line = invocation.to_string();
  info!(cmd = %command_line, policy = ?invocation.policy, "executing command");

  let working_dir: PathBuf = match (&invocation.cwd, default_dir) {
    (Some(cwd), _) => ctx.resolve_path(cwd),
    (None, Some(dir)) => dir.to_path_buf(),
    (None, None) => ctx.workdir().to_path_buf(),
  };

  tokio::fs::create_dir_all(&working_dir)
    .await
    .map_err(|source| CommandError::Workdir {
      path: working_dir.clone(),
      source,
    })?;

  let env = layered(ctx.environment(), &[&invocation.env]);

  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .current_dir(&working_dir)
    .env_clear()
    .envs(&env)
    .stdin(Stdio::null());

  debug!(working_dir = ?working_dir, env_overrides = invocation.env.len(), "spawning process");

  let started = Instant::now();
  let output = match command.output().await {
    Ok(output) => output,
    Err(source) => {
      return match invocation.policy {
        FailurePolicy::Strict => Err(CommandError::Spawn {
          command: command_line,
          source,
        }),
        FailurePolicy::Tolerant => {
          warn!(cmd = %command_line, error = %source, "command could not be started (tolerated)");
          Ok(CommandOutput {
            command: command_line,
            exit_code: None,
            stdout: String::new(),
            stderr: source.to_string(),
            duration: started.elapsed(),
            outcome: CommandOutcome::Tolerated,
          })
        }
      };
    }
  };
  let duration = started.elapsed();

  let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
  let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
  let code = output.status.code();

  if output.status.success() {
    if !stdout.is_empty() {
      debug!(stdout = %stdout.trim_end(), "command output");
    }
    return Ok(CommandOutput {
      command: command_line,
      exit_code: code,
      stdout,
      stderr,
      duration,
      outcome: CommandOutcome::Succeeded,
    });
  }

  if !stderr.is_empty() {
    debug!(stderr = %stderr.trim_end(), "command stderr");
  }

  match invocation.policy {
    FailurePolicy::Strict => Err(CommandError::Failed {
      command: command_line,
      code,
      stdout,
      stderr,
      duration,
    }),
    FailurePolicy::Tolerant => {
      warn!(cmd = %command_line, code = ?code, "command failed (tolerated)");
      Ok(CommandOutput {
        command: command_line,
        exit_code: code,
        stdout,
        stderr,
        duration,
        outcome: CommandOutcome::Tolerated,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::exec::env::EnvOverlay;
  use crate::util::testutil::{echo_env, exit_with, touch_file};

  fn context(dir: &TempDir) -> ExecutionContext {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    ExecutionContext::with_environment(dir.path(), "test", env)
  }

  #[tokio::test]
  async fn captures_stdout() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let out = run_command(&echo_env("PATH"), &ctx, None).await.unwrap();

    assert_eq!(out.outcome, CommandOutcome::Succeeded);
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(out.stdout.trim(), "/usr/bin:/bin");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn overlay_is_layered_on_snapshot() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp).overlay(&EnvOverlay::new().prepend("PATH", "/tk/bin"));

    let out = run_command(&echo_env("PATH"), &ctx, None).await.unwrap();
    assert_eq!(out.stdout.trim(), "/tk/bin:/usr/bin:/bin");

    let cmd = echo_env("MY_VAR").env("MY_VAR", "my_value");
    let out = run_command(&cmd, &ctx, None).await.unwrap();
    assert_eq!(out.stdout.trim(), "my_value");
  }

  #[tokio::test]
  async fn strict_failure_carries_output() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let err = run_command(&exit_with(3, "boom"), &ctx, None).await.unwrap_err();

    match err {
      CommandError::Failed { code, stderr, .. } => {
        assert_eq!(code, Some(3));
        assert!(stderr.contains("boom"));
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  #[traced_test]
  async fn tolerant_failure_is_recorded_not_raised() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let out = run_command(&exit_with(1, "").tolerant(), &ctx, None).await.unwrap();

    assert_eq!(out.outcome, CommandOutcome::Tolerated);
    assert_eq!(out.exit_code, Some(1));
    assert!(logs_contain("command failed (tolerated)"));
  }

  #[tokio::test]
  async fn spawn_failure_follows_policy() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let missing = CommandInvocation::new("/nonexistent/phasegraph-test-binary");

    let err = run_command(&missing, &ctx, None).await.unwrap_err();
    assert!(matches!(err, CommandError::Spawn { .. }));

    let out = run_command(&missing.tolerant(), &ctx, None).await.unwrap();
    assert_eq!(out.outcome, CommandOutcome::Tolerated);
    assert_eq!(out.exit_code, None);
  }

  #[tokio::test]
  async fn default_dir_is_created_and_used() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let build_dir = temp.path().join("build_k1b");

    run_command(&touch_file("marker"), &ctx, Some(&build_dir)).await.unwrap();

    assert!(build_dir.join("marker").exists());
  }

  #[tokio::test]
  async fn explicit_cwd_is_relative_to_workdir() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);

    let cmd = touch_file("cwd_marker").cwd("sub/dir");
    run_command(&cmd, &ctx, Some(&temp.path().join("ignored"))).await.unwrap();

    assert!(temp.path().join("sub/dir/cwd_marker").exists());
    assert!(!temp.path().join("ignored").exists());
  }
}
