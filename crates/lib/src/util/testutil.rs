//! Test utilities for phasegraph-lib.
//!
//! Cross-platform builders for the small commands tests need to run.

use crate::exec::CommandInvocation;

/// A command that prints the value of an environment variable.
#[cfg(unix)]
pub fn echo_env(var: &str) -> CommandInvocation {
  CommandInvocation::shell(format!("echo \"${var}\""))
}

#[cfg(windows)]
pub fn echo_env(var: &str) -> CommandInvocation {
  CommandInvocation::shell(format!("echo %{var}%"))
}

/// A command that writes `msg` to stderr and exits with `code`.
#[cfg(unix)]
pub fn exit_with(code: i32, msg: &str) -> CommandInvocation {
  CommandInvocation::shell(format!("echo '{msg}' >&2; exit {code}"))
}

#[cfg(windows)]
pub fn exit_with(code: i32, msg: &str) -> CommandInvocation {
  CommandInvocation::shell(format!("echo {msg} 1>&2 & exit /b {code}"))
}

/// A command that creates an empty file in its working directory.
#[cfg(unix)]
pub fn touch_file(filename: &str) -> CommandInvocation {
  CommandInvocation::shell(format!(": > '{filename}'"))
}

#[cfg(windows)]
pub fn touch_file(filename: &str) -> CommandInvocation {
  CommandInvocation::shell(format!("type nul > {filename}"))
}
