//! Environment layering for command execution.
//!
//! Commands never see the live process environment. The ambient environment
//! is snapshotted once per run and every invocation receives that snapshot
//! with one or more overlays applied on top. Overlay entries either replace a
//! variable or prepend to it, so a toolchain's `bin` and `lib` directories are
//! put in front of the existing search paths instead of substituting them.

use std::collections::BTreeMap;
use std::path::Path;

/// Separator for path-like variables (`PATH`, `LD_LIBRARY_PATH`).
#[cfg(unix)]
pub const PATH_SEPARATOR: &str = ":";

#[cfg(windows)]
pub const PATH_SEPARATOR: &str = ";";

/// How an overlay entry combines with the value underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOverride {
  /// Replace the existing value.
  Set(String),
  /// Compose as `prefix + separator + existing`.
  Prepend(String),
}

/// An ordered set of environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
  entries: BTreeMap<String, EnvOverride>,
}

impl EnvOverlay {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace `key` with `value`.
  pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.entries.insert(key.into(), EnvOverride::Set(value.into()));
    self
  }

  /// Prepend `prefix` to the existing value of `key`.
  pub fn prepend(mut self, key: impl Into<String>, prefix: impl Into<String>) -> Self {
    self.entries.insert(key.into(), EnvOverride::Prepend(prefix.into()));
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: EnvOverride) {
    self.entries.insert(key.into(), value);
  }

  pub fn get(&self, key: &str) -> Option<&EnvOverride> {
    self.entries.get(key)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &EnvOverride)> {
    self.entries.iter()
  }

  /// Apply this overlay to `env` in place.
  pub fn apply_to(&self, env: &mut BTreeMap<String, String>) {
    for (key, value) in &self.entries {
      let composed = match value {
        EnvOverride::Set(v) => v.clone(),
        EnvOverride::Prepend(prefix) => compose_path(prefix, env.get(key).map(String::as_str)),
      };
      env.insert(key.clone(), composed);
    }
  }
}

/// Compose a path-like value: `prefix:existing`, or just `prefix` when
/// nothing is set underneath.
pub fn compose_path(prefix: &str, existing: Option<&str>) -> String {
  match existing {
    Some(existing) if !existing.is_empty() => format!("{prefix}{PATH_SEPARATOR}{existing}"),
    _ => prefix.to_string(),
  }
}

/// Build the effective environment: `base` with each overlay applied in order.
pub fn layered(base: &BTreeMap<String, String>, overlays: &[&EnvOverlay]) -> BTreeMap<String, String> {
  let mut env = base.clone();
  for overlay in overlays {
    overlay.apply_to(&mut env);
  }
  env
}

/// Overlay that puts a toolchain in front of the search paths.
///
/// Sets `TOOLCHAIN_DIR`, prepends `<root>/bin` to `PATH` and
/// `<root>/lib`, `<root>/lib64` to `LD_LIBRARY_PATH`.
pub fn toolchain_overlay(root: &Path) -> EnvOverlay {
  let libs = [root.join("lib"), root.join("lib64")]
    .iter()
    .map(|p| p.to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join(PATH_SEPARATOR);

  EnvOverlay::new()
    .set("TOOLCHAIN_DIR", root.to_string_lossy())
    .prepend("PATH", root.join("bin").to_string_lossy())
    .prepend("LD_LIBRARY_PATH", libs)
}
