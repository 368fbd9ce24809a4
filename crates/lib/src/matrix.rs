//! Configuration registry and matrix expansion inputs.
//!
//! A configuration identifier (for example `k1b-nodeos` or `x86_64`) selects
//! one build or validation variant. The registry maps identifiers to their
//! attribute bags and validates requested identifier lists before anything
//! runs. Identifiers iterate in sorted order so listings are deterministic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while resolving configuration identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("unknown configuration {}; valid configurations: {}", .unknown.join(", "), .valid.join(", "))]
  Unknown { unknown: Vec<String>, valid: Vec<String> },

  #[error("configuration already registered: {0}")]
  Duplicate(String),

  #[error("configuration {id} would share build directory {dir} with {existing}")]
  DirectoryClash { id: String, existing: String, dir: String },

  #[error("unknown label {label}; known labels: {}", .known.join(", "))]
  UnknownLabel { label: String, known: Vec<String> },
}

/// Attribute bag of one configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigAttributes {
  /// Platform name passed to configure-style actions. Defaults to the
  /// identifier itself.
  #[serde(default)]
  pub platform: Option<String>,

  /// Extra flags appended to configure-style actions.
  #[serde(default)]
  pub flags: Vec<String>,

  /// Per-entry switches such as `build_tests`.
  #[serde(default)]
  pub toggles: BTreeMap<String, bool>,
}

/// A registered configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEntry {
  id: String,
  attrs: ConfigAttributes,
}

impl ConfigurationEntry {
  pub fn new(id: impl Into<String>, attrs: ConfigAttributes) -> Self {
    Self { id: id.into(), attrs }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn platform(&self) -> &str {
    self.attrs.platform.as_deref().unwrap_or(&self.id)
  }

  pub fn flags(&self) -> &[String] {
    &self.attrs.flags
  }

  /// Value of a toggle; unset toggles read as `false`.
  pub fn toggle(&self, name: &str) -> bool {
    self.attrs.toggles.get(name).copied().unwrap_or(false)
  }

  pub fn attributes(&self) -> &ConfigAttributes {
    &self.attrs
  }

  /// Build subdirectory owned by this entry, e.g. `build_k1b-nodeos`.
  pub fn build_subdir(&self) -> String {
    format!("build_{}", dir_component(&self.id))
  }

  /// Install subdirectory owned by this entry, e.g. `install_k1b-nodeos`.
  pub fn install_subdir(&self) -> String {
    format!("install_{}", dir_component(&self.id))
  }
}

/// Map an identifier to a single path component.
fn dir_component(id: &str) -> String {
  id.chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
        c
      } else {
        '_'
      }
    })
    .collect()
}

/// Registry of known configurations.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
  entries: BTreeMap<String, Arc<ConfigurationEntry>>,
}

impl ConfigRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a configuration.
  ///
  /// Identifiers are unique, and so are the build directories derived from
  /// them: `k1b/nodeos` is rejected once `k1b_nodeos` exists.
  pub fn register(&mut self, id: impl Into<String>, attrs: ConfigAttributes) -> Result<(), ConfigError> {
    let id = id.into();
    if self.entries.contains_key(&id) {
      return Err(ConfigError::Duplicate(id));
    }
    let entry = Arc::new(ConfigurationEntry::new(id.clone(), attrs));
    let dir = entry.build_subdir();
    if let Some(existing) = self.entries.values().find(|e| e.build_subdir() == dir) {
      return Err(ConfigError::DirectoryClash {
        id,
        existing: existing.id().to_string(),
        dir,
      });
    }
    self.entries.insert(id, entry);
    Ok(())
  }

  /// Identifiers in sorted order.
  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.entries.keys().map(String::as_str)
  }

  pub fn get(&self, id: &str) -> Option<&Arc<ConfigurationEntry>> {
    self.entries.get(id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Resolve `names` to entries, preserving request order.
  ///
  /// Repeated names are collapsed to their first occurrence so no two units
  /// of one target ever share a build directory.
  ///
  /// # Errors
  ///
  /// [`ConfigError::Unknown`] listing every unknown name and every valid
  /// identifier when any name is not registered.
  pub fn validate<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Arc<ConfigurationEntry>>, ConfigError> {
    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(names.len());
    let mut unknown = Vec::new();

    for name in names {
      let name = name.as_ref();
      if !seen.insert(name) {
        continue;
      }
      match self.entries.get(name) {
        Some(entry) => resolved.push(Arc::clone(entry)),
        None => unknown.push(name.to_string()),
      }
    }

    if !unknown.is_empty() {
      return Err(ConfigError::Unknown {
        unknown,
        valid: self.ids().map(str::to_string).collect(),
      });
    }

    Ok(resolved)
  }
}

/// Split a space-separated identifier list (`--configs "a b"`).
pub fn parse_list(input: &str) -> Vec<String> {
  input.split_whitespace().map(str::to_string).collect()
}

/// Enumerated mapping from a CI label to a fixed validation subset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  labels: BTreeMap<String, Vec<String>>,
}

impl LabelTable {
  pub fn new(labels: BTreeMap<String, Vec<String>>) -> Self {
    Self { labels }
  }

  /// Identifiers selected by `label`.
  pub fn select(&self, label: &str) -> Result<&[String], ConfigError> {
    self
      .labels
      .get(label)
      .map(Vec::as_slice)
      .ok_or_else(|| ConfigError::UnknownLabel {
        label: label.to_string(),
        known: self.labels.keys().cloned().collect(),
      })
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry(ids: &[&str]) -> ConfigRegistry {
    let mut registry = ConfigRegistry::new();
    for id in ids {
      registry.register(*id, ConfigAttributes::default()).unwrap();
    }
    registry
  }

  #[test]
  fn unknown_config_lists_valid_ids() {
    let registry = registry(&["x86_64", "k1a"]);

    let err = registry.validate(&["bogus"]).unwrap_err();
    match &err {
      ConfigError::Unknown { unknown, valid } => {
        assert_eq!(unknown, &vec!["bogus".to_string()]);
        assert_eq!(valid, &vec!["k1a".to_string(), "x86_64".to_string()]);
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
      err.to_string(),
      "unknown configuration bogus; valid configurations: k1a, x86_64"
    );
  }

  #[test]
  fn validate_preserves_order_and_collapses_duplicates() {
    let registry = registry(&["a", "b", "c"]);
    let entries = registry.validate(&["c", "a", "c"]).unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.id()).collect();
    assert_eq!(ids, vec!["c", "a"]);
  }

  #[test]
  fn validate_empty_request() {
    let registry = registry(&["a"]);
    assert!(registry.validate::<&str>(&[]).unwrap().is_empty());
  }

  #[test]
  fn duplicate_registration_fails() {
    let mut registry = registry(&["a"]);
    assert_eq!(
      registry.register("a", ConfigAttributes::default()),
      Err(ConfigError::Duplicate("a".to_string()))
    );
  }

  #[test]
  fn ids_sharing_a_build_directory_are_rejected() {
    let mut registry = registry(&["k1b_nodeos"]);

    let err = registry.register("k1b/nodeos", ConfigAttributes::default()).unwrap_err();

    assert_eq!(
      err,
      ConfigError::DirectoryClash {
        id: "k1b/nodeos".to_string(),
        existing: "k1b_nodeos".to_string(),
        dir: "build_k1b_nodeos".to_string(),
      }
    );
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["k1b_nodeos"]);
    assert!(registry.register("k1b-nodeos", ConfigAttributes::default()).is_ok());
  }

  #[test]
  fn ids_are_sorted() {
    let registry = registry(&["k1b-nodeos", "k1a-elf", "x86_64"]);
    assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["k1a-elf", "k1b-nodeos", "x86_64"]);
  }

  #[test]
  fn entry_attributes() {
    let mut toggles = BTreeMap::new();
    toggles.insert("build_tests".to_string(), true);
    let entry = ConfigurationEntry::new(
      "k1b/nodeos",
      ConfigAttributes {
        platform: Some("k1b-nodeos".to_string()),
        flags: vec!["--enable-test-perf".to_string()],
        toggles,
      },
    );

    assert_eq!(entry.platform(), "k1b-nodeos");
    assert!(entry.toggle("build_tests"));
    assert!(!entry.toggle("missing"));
    assert_eq!(entry.build_subdir(), "build_k1b_nodeos");
    assert_eq!(entry.install_subdir(), "install_k1b_nodeos");
  }

  #[test]
  fn platform_defaults_to_id() {
    let entry = ConfigurationEntry::new("x86_64", ConfigAttributes::default());
    assert_eq!(entry.platform(), "x86_64");
  }

  #[test]
  fn parse_space_separated_list() {
    assert_eq!(parse_list("  k1a  k1b-nodeos x86_64 "), vec!["k1a", "k1b-nodeos", "x86_64"]);
    assert!(parse_list("").is_empty());
  }

  #[test]
  fn label_selects_fixed_subset() {
    let mut labels = BTreeMap::new();
    labels.insert("fpga-k1b".to_string(), vec!["k1b-nodeos".to_string()]);
    let table = LabelTable::new(labels);

    assert_eq!(table.select("fpga-k1b").unwrap(), ["k1b-nodeos".to_string()]);
    assert_eq!(
      table.select("gpu").unwrap_err(),
      ConfigError::UnknownLabel {
        label: "gpu".to_string(),
        known: vec!["fpga-k1b".to_string()],
      }
    );
  }
}
