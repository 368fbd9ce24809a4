//! Run-wide execution context.
//!
//! One [`ExecutionContext`] is built per run, before the scheduler starts,
//! and shared read-only (behind an `Arc`) by every target, matrix entry and
//! command. It carries the working directory, the environment snapshot the
//! commands start from, the log session name and the run variables that step
//! templates may reference.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::exec::env::EnvOverlay;
use crate::matrix::ConfigurationEntry;
use crate::placeholder::{Placeholder, PlaceholderError, Resolver};

#[derive(Debug, Clone)]
pub struct ExecutionContext {
  workdir: PathBuf,
  environment: BTreeMap<String, String>,
  session: String,
  vars: BTreeMap<String, String>,
}

impl ExecutionContext {
  /// Context whose environment is a snapshot of the current process
  /// environment. Variables that are not valid UTF-8 are left out.
  pub fn from_process_env(workdir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
    let mut environment = BTreeMap::new();
    for (key, value) in std::env::vars_os() {
      match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => {
          environment.insert(key, value);
        }
        (key, _) => {
          let key = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
          warn!(variable = %key, "skipping non UTF-8 environment variable");
        }
      }
    }
    Self::with_environment(workdir, session, environment)
  }

  /// Context with an explicit base environment.
  pub fn with_environment(
    workdir: impl Into<PathBuf>,
    session: impl Into<String>,
    environment: BTreeMap<String, String>,
  ) -> Self {
    Self {
      workdir: workdir.into(),
      environment,
      session: session.into(),
      vars: BTreeMap::new(),
    }
  }

  /// Apply a run-level overlay (toolchain paths and the like) to the base
  /// environment.
  pub fn overlay(mut self, overlay: &EnvOverlay) -> Self {
    overlay.apply_to(&mut self.environment);
    self
  }

  /// Define a run variable for `$${var:NAME}` placeholders.
  pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.vars.insert(name.into(), value.into());
    self
  }

  pub fn workdir(&self) -> &Path {
    &self.workdir
  }

  pub fn environment(&self) -> &BTreeMap<String, String> {
    &self.environment
  }

  pub fn session(&self) -> &str {
    &self.session
  }

  pub fn get_var(&self, name: &str) -> Option<&str> {
    self.vars.get(name).map(String::as_str)
  }

  pub fn vars(&self) -> &BTreeMap<String, String> {
    &self.vars
  }

  /// Resolve `path` against the working directory.
  pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.workdir.join(path)
    }
  }

  /// Isolated build directory of `entry`.
  pub fn build_dir(&self, entry: &ConfigurationEntry) -> PathBuf {
    self.workdir.join(entry.build_subdir())
  }

  /// Isolated install directory of `entry`.
  pub fn install_dir(&self, entry: &ConfigurationEntry) -> PathBuf {
    self.workdir.join(entry.install_subdir())
  }

  /// Placeholder resolver for one unit of work.
  pub fn resolver<'a>(&'a self, entry: Option<&'a ConfigurationEntry>) -> ContextResolver<'a> {
    ContextResolver { ctx: self, entry }
  }
}

/// Resolves placeholders from a context and, for matrix units, the current
/// configuration entry.
#[derive(Debug, Clone, Copy)]
pub struct ContextResolver<'a> {
  ctx: &'a ExecutionContext,
  entry: Option<&'a ConfigurationEntry>,
}

impl ContextResolver<'_> {
  fn entry(&self, name: &str) -> Result<&ConfigurationEntry, PlaceholderError> {
    self.entry.ok_or_else(|| PlaceholderError::NoEntry(name.to_string()))
  }
}

impl Resolver for ContextResolver<'_> {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
    match placeholder {
      Placeholder::Config => Ok(self.entry("config")?.id().to_string()),
      Placeholder::Platform => Ok(self.entry("platform")?.platform().to_string()),
      Placeholder::Flags => Ok(self.entry("flags")?.flags().join(" ")),
      Placeholder::BuildDir => Ok(self.ctx.build_dir(self.entry("build_dir")?).to_string_lossy().into_owned()),
      Placeholder::InstallDir => Ok(
        self
          .ctx
          .install_dir(self.entry("install_dir")?)
          .to_string_lossy()
          .into_owned(),
      ),
      Placeholder::Workdir => Ok(self.ctx.workdir.to_string_lossy().into_owned()),
      Placeholder::Toggle(name) => Ok(if self.entry("toggle")?.toggle(name) { "yes" } else { "no" }.to_string()),
      Placeholder::Var(name) => self
        .ctx
        .get_var(name)
        .map(str::to_string)
        .ok_or_else(|| PlaceholderError::UnresolvedVar(name.clone())),
    }
  }
}

#[cfg(test)]
mod tests {
  use serial_test::serial;

  use super::*;
  use crate::matrix::ConfigAttributes;
  use crate::placeholder::substitute;

  fn entry() -> ConfigurationEntry {
    let mut toggles = BTreeMap::new();
    toggles.insert("build_tests".to_string(), true);
    ConfigurationEntry::new(
      "k1b",
      ConfigAttributes {
        platform: Some("k1b-nodeos".to_string()),
        flags: vec!["--a".to_string(), "--b".to_string()],
        toggles,
      },
    )
  }

  #[test]
  fn resolves_entry_placeholders() {
    let ctx = ExecutionContext::with_environment("/ws", "odp", BTreeMap::new()).var("debug_flags", "--enable-debug");
    let entry = entry();
    let resolver = ctx.resolver(Some(&entry));

    let out = substitute(
      "$${config} $${platform} $${flags} $${build_dir} $${toggle:build_tests} $${var:debug_flags}",
      &resolver,
    )
    .unwrap();
    assert_eq!(out, "k1b k1b-nodeos --a --b /ws/build_k1b yes --enable-debug");
  }

  #[test]
  fn sequential_units_reject_entry_placeholders() {
    let ctx = ExecutionContext::with_environment("/ws", "odp", BTreeMap::new());
    let err = substitute("$${build_dir}", &ctx.resolver(None)).unwrap_err();
    assert_eq!(err, PlaceholderError::NoEntry("build_dir".to_string()));

    assert_eq!(substitute("$${workdir}", &ctx.resolver(None)).unwrap(), "/ws");
  }

  #[test]
  fn resolve_path_relative_and_absolute() {
    let ctx = ExecutionContext::with_environment("/ws", "odp", BTreeMap::new());
    assert_eq!(ctx.resolve_path("install"), PathBuf::from("/ws/install"));
    assert_eq!(ctx.resolve_path("/abs/out"), PathBuf::from("/abs/out"));
  }

  #[test]
  #[serial]
  fn process_environment_is_snapshotted() {
    temp_env::with_var("PHASEGRAPH_SNAPSHOT_TEST", Some("before"), || {
      let ctx = ExecutionContext::from_process_env("/ws", "odp");
      unsafe { std::env::set_var("PHASEGRAPH_SNAPSHOT_TEST", "after") };
      assert_eq!(ctx.environment()["PHASEGRAPH_SNAPSHOT_TEST"], "before");
    });
  }

  #[test]
  #[serial]
  #[cfg(unix)]
  fn non_utf8_variables_are_skipped() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let bad = OsStr::from_bytes(b"\xff\xfe");
    temp_env::with_vars(
      [
        ("PHASEGRAPH_BAD_VALUE", Some(bad)),
        ("PHASEGRAPH_GOOD_VALUE", Some(OsStr::new("ok"))),
      ],
      || {
        let ctx = ExecutionContext::from_process_env("/ws", "odp");
        assert!(!ctx.environment().contains_key("PHASEGRAPH_BAD_VALUE"));
        assert_eq!(ctx.environment()["PHASEGRAPH_GOOD_VALUE"], "ok");
      },
    );
  }

  #[test]
  #[cfg(unix)]
  fn overlay_applies_to_snapshot() {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), "/usr/bin".to_string());
    let ctx = ExecutionContext::with_environment("/ws", "odp", env)
      .overlay(&EnvOverlay::new().prepend("PATH", "/tk/bin"));
    assert_eq!(ctx.environment()["PATH"], "/tk/bin:/usr/bin");
  }
}
