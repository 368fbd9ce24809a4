//! Declarative pipeline files.
//!
//! A pipeline file (TOML) declares the session name, the configuration
//! registry, the label table, the targets with their steps, and the packages
//! the package steps assemble. [`PipelineFile::build_graph`] turns it into a
//! [`TargetGraph`] whose actions substitute step templates per unit.
//!
//! ```toml
//! session = "odp"
//! default_targets = ["build"]
//!
//! [configs.k1b-nodeos]
//! flags = ["--enable-test-perf"]
//!
//! [[targets]]
//! name = "build"
//! kind = "matrix"
//! steps = [{ run = ["make", "-C", "$${build_dir}"] }]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::exec::{CommandInvocation, EnvOverlay, FailurePolicy};
use crate::graph::{Action, ActionError, GraphError, Step, Target, TargetGraph};
use crate::matrix::{ConfigAttributes, ConfigError, ConfigRegistry, ConfigurationEntry, LabelTable, parse_list};
use crate::package::{PackageBatch, PackageDependency, PackageSpec, ParameterFile, ReleaseInfo, VersionOp};
use crate::placeholder::{expand_arg, substitute};

/// Name of the pipeline file looked up by default.
pub const DEFAULT_PIPELINE_FILE: &str = "phasegraph.toml";

/// Default environment variable holding the CI label.
pub const DEFAULT_LABEL_ENV: &str = "CI_LABEL";

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("failed to read pipeline file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse pipeline file {origin}: {source}")]
  Parse {
    origin: String,
    #[source]
    source: toml::de::Error,
  },

  #[error("target {target}, step {index}: {reason}")]
  Step {
    target: String,
    index: usize,
    reason: String,
  },

  #[error("target {target} references undeclared package {package}")]
  UnknownPackage { target: String, package: String },

  #[error("package {0} is declared more than once")]
  DuplicatePackage(String),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Config(#[from] ConfigError),
}

fn default_label_env() -> String {
  DEFAULT_LABEL_ENV.to_string()
}

/// Top-level pipeline document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
  /// Log session name; the report is written as `<session>.json`.
  pub session: String,
  #[serde(default)]
  pub default_targets: Vec<String>,
  /// Value of the `debug_flags` run variable when debugging is requested.
  #[serde(default)]
  pub debug_flags: String,
  #[serde(default = "default_label_env")]
  pub label_env: String,
  #[serde(default)]
  pub configs: BTreeMap<String, ConfigAttributes>,
  #[serde(default)]
  pub labels: BTreeMap<String, Vec<String>>,
  /// Fixed release metadata, used instead of querying the repository.
  #[serde(default)]
  pub release: Option<ReleaseInfo>,
  #[serde(default)]
  pub targets: Vec<TargetDef>,
  #[serde(default)]
  pub packages: Vec<PackageDef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindDef {
  #[default]
  Sequential,
  Matrix,
}

/// Which configuration list a matrix target expands over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSet {
  /// The build list (`--configs`).
  #[default]
  Build,
  /// The validation list (`--valid-configs` or the CI label).
  Valid,
  /// Every registered configuration.
  All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDef {
  pub name: String,
  #[serde(default)]
  pub kind: KindDef,
  #[serde(default)]
  pub deps: Vec<String>,
  #[serde(default)]
  pub configs: ConfigSet,
  pub title: Option<String>,
  #[serde(default)]
  pub tolerant: bool,
  /// Variables set for every command of this target.
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Path-like variables prefixed for every command of this target.
  #[serde(default)]
  pub env_prepend: BTreeMap<String, String>,
  #[serde(default)]
  pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl OneOrMany {
  pub fn names(&self) -> Vec<&str> {
    match self {
      OneOrMany::One(name) => vec![name.as_str()],
      OneOrMany::Many(names) => names.iter().map(String::as_str).collect(),
    }
  }
}

/// One step. Exactly one of `run`, `shell`, `package` and `params` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDef {
  /// Program and arguments. An argument that is a single placeholder
  /// expands to zero or more words.
  pub run: Option<Vec<String>>,
  /// Command line for the system shell.
  pub shell: Option<String>,
  /// Packages to assemble.
  pub package: Option<OneOrMany>,
  /// Path of a parameter file to write.
  pub params: Option<String>,
  #[serde(default)]
  pub policy: FailurePolicy,
  pub cwd: Option<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

impl StepDef {
  fn check(&self) -> Result<(), String> {
    let set = [
      self.run.is_some(),
      self.shell.is_some(),
      self.package.is_some(),
      self.params.is_some(),
    ]
    .iter()
    .filter(|s| **s)
    .count();
    if set != 1 {
      return Err("exactly one of run, shell, package or params is required".to_string());
    }
    if self.run.as_ref().is_some_and(Vec::is_empty) {
      return Err("run needs at least a program".to_string());
    }
    let command = self.run.is_some() || self.shell.is_some();
    if !command && (self.cwd.is_some() || !self.env.is_empty() || self.policy != FailurePolicy::Strict) {
      return Err("cwd, env and policy only apply to run and shell steps".to_string());
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDef {
  pub name: String,
  pub op: VersionOp,
  pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDef {
  pub name: String,
  /// Artifact directory to package, relative to the working directory.
  pub bundle: String,
  #[serde(default)]
  pub description: String,
  #[serde(default = "default_prefix")]
  pub prefix: String,
  #[serde(default)]
  pub depends: Vec<DependencyDef>,
  /// Packages of the same step this one requires at the same version.
  #[serde(default)]
  pub siblings: Vec<String>,
  /// Output directory; defaults to the `output_dir` run variable, then
  /// `packages/` under the working directory.
  pub output_dir: Option<String>,
}

fn default_prefix() -> String {
  "/usr/local".to_string()
}

/// Configuration lists selected for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
  pub build: Vec<String>,
  pub valid: Vec<String>,
}

impl Selection {
  /// Resolve the build and validation lists.
  ///
  /// `configs` defaults to every registered configuration. `valid_configs`
  /// defaults to the label's subset when `label` is set and the table is not
  /// empty, then to the build list. Both lists are validated.
  pub fn resolve(
    registry: &ConfigRegistry,
    labels: &LabelTable,
    configs: Option<&str>,
    valid_configs: Option<&str>,
    label: Option<&str>,
  ) -> Result<Self, ConfigError> {
    let build = match configs {
      Some(list) => parse_list(list),
      None => registry.ids().map(str::to_string).collect(),
    };

    let valid = match (valid_configs, label) {
      (Some(list), _) => parse_list(list),
      (None, Some(label)) if !labels.is_empty() => labels.select(label)?.to_vec(),
      (None, _) => build.clone(),
    };

    let ids = |entries: Vec<Arc<ConfigurationEntry>>| -> Vec<String> { entries.iter().map(|e| e.id().to_string()).collect() };
    Ok(Self {
      build: ids(registry.validate(&build)?),
      valid: ids(registry.validate(&valid)?),
    })
  }

  fn list(&self, set: ConfigSet, registry: &ConfigRegistry) -> Vec<String> {
    match set {
      ConfigSet::Build => self.build.clone(),
      ConfigSet::Valid => self.valid.clone(),
      ConfigSet::All => registry.ids().map(str::to_string).collect(),
    }
  }
}

impl PipelineFile {
  pub fn load(path: &Path) -> Result<Self, PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&text, &path.display().to_string())
  }

  pub fn parse(text: &str, origin: &str) -> Result<Self, PipelineError> {
    toml::from_str(text).map_err(|source| PipelineError::Parse {
      origin: origin.to_string(),
      source,
    })
  }

  pub fn registry(&self) -> Result<ConfigRegistry, ConfigError> {
    let mut registry = ConfigRegistry::new();
    for (id, attrs) in &self.configs {
      registry.register(id.clone(), attrs.clone())?;
    }
    Ok(registry)
  }

  pub fn label_table(&self) -> LabelTable {
    LabelTable::new(self.labels.clone())
  }

  /// Whether any step needs release metadata.
  pub fn needs_release(&self) -> bool {
    self
      .targets
      .iter()
      .flat_map(|t| &t.steps)
      .any(|s| s.package.is_some() || s.params.is_some())
  }

  /// Build the target graph for `selection`.
  ///
  /// `release` is shared by every package and params step; when it is
  /// `None`, those steps fail their unit.
  pub fn build_graph(
    &self,
    registry: &ConfigRegistry,
    selection: &Selection,
    release: Option<ReleaseInfo>,
  ) -> Result<TargetGraph, PipelineError> {
    let mut packages = BTreeMap::new();
    for package in &self.packages {
      if packages.insert(package.name.clone(), package.clone()).is_some() {
        return Err(PipelineError::DuplicatePackage(package.name.clone()));
      }
    }
    let packages = Arc::new(packages);

    let mut graph = TargetGraph::new();
    for def in &self.targets {
      for (index, step) in def.steps.iter().enumerate() {
        step.check().map_err(|reason| PipelineError::Step {
          target: def.name.clone(),
          index,
          reason,
        })?;
        for name in step.package.iter().flat_map(OneOrMany::names) {
          if !packages.contains_key(name) {
            return Err(PipelineError::UnknownPackage {
              target: def.name.clone(),
              package: name.to_string(),
            });
          }
        }
      }

      let action = PipelineAction {
        target: def.clone(),
        packages: Arc::clone(&packages),
        release: release.clone(),
      };
      let target = match def.kind {
        KindDef::Sequential => Target::sequential(&def.name, action),
        KindDef::Matrix => Target::matrix(&def.name, selection.list(def.configs, registry), action),
      };
      let target = target.deps(def.deps.iter().cloned()).tolerant(def.tolerant);
      let target = match &def.title {
        Some(title) => target.title(title),
        None => target,
      };
      debug!(target = %def.name, steps = def.steps.len(), "registered pipeline target");
      graph.register(target)?;
    }

    graph.set_defaults(self.default_targets.iter().cloned());
    Ok(graph)
  }
}

/// Action of a pipeline target: substitutes the step templates for the
/// current unit.
struct PipelineAction {
  target: TargetDef,
  packages: Arc<BTreeMap<String, PackageDef>>,
  release: Option<ReleaseInfo>,
}

impl PipelineAction {
  fn release(&self) -> Result<&ReleaseInfo, ActionError> {
    self
      .release
      .as_ref()
      .ok_or_else(|| ActionError::Invalid("release information is unavailable".to_string()))
  }

  fn command(
    &self,
    step: &StepDef,
    ctx: &ExecutionContext,
    entry: Option<&ConfigurationEntry>,
  ) -> Result<CommandInvocation, ActionError> {
    let resolver = ctx.resolver(entry);

    let mut invocation = match (&step.run, &step.shell) {
      (Some(argv), _) => {
        let mut words = Vec::with_capacity(argv.len());
        for arg in argv {
          words.extend(expand_arg(arg, &resolver)?);
        }
        let mut words = words.into_iter();
        let program = words
          .next()
          .ok_or_else(|| ActionError::Invalid("command expands to nothing".to_string()))?;
        CommandInvocation::new(program).args(words)
      }
      (None, Some(line)) => CommandInvocation::shell(substitute(line, &resolver)?),
      (None, None) => return Err(ActionError::Invalid("step has no command".to_string())),
    };

    let mut overlay = EnvOverlay::new();
    for (key, value) in &self.target.env {
      overlay = overlay.set(key, substitute(value, &resolver)?);
    }
    for (key, prefix) in &self.target.env_prepend {
      overlay = overlay.prepend(key, substitute(prefix, &resolver)?);
    }
    for (key, value) in &step.env {
      overlay = overlay.set(key, substitute(value, &resolver)?);
    }
    invocation = invocation.overlay(overlay).policy(step.policy);

    if let Some(cwd) = &step.cwd {
      invocation = invocation.cwd(substitute(cwd, &resolver)?);
    }
    Ok(invocation)
  }

  fn package_batch(
    &self,
    names: &OneOrMany,
    ctx: &ExecutionContext,
    entry: Option<&ConfigurationEntry>,
  ) -> Result<PackageBatch, ActionError> {
    let resolver = ctx.resolver(entry);
    let release = self.release()?.clone();
    let default_output = ctx
      .get_var("output_dir")
      .filter(|dir| !dir.is_empty())
      .map(|dir| ctx.resolve_path(dir))
      .unwrap_or_else(|| ctx.workdir().join("packages"));

    let mut packages = Vec::new();
    for name in names.names() {
      let def = self
        .packages
        .get(name)
        .ok_or_else(|| ActionError::Invalid(format!("undeclared package {name}")))?;

      let mut depends = Vec::with_capacity(def.depends.len());
      for dep in &def.depends {
        depends.push(PackageDependency::new(
          &dep.name,
          dep.op,
          substitute(&dep.version, &resolver)?,
        ));
      }
      let output_dir = match &def.output_dir {
        Some(dir) => ctx.resolve_path(substitute(dir, &resolver)?),
        None => default_output.clone(),
      };

      packages.push(PackageSpec {
        name: def.name.clone(),
        bundle: ctx.resolve_path(substitute(&def.bundle, &resolver)?),
        description: substitute(&def.description, &resolver)?,
        prefix: PathBuf::from(substitute(&def.prefix, &resolver)?),
        depends,
        siblings: def.siblings.clone(),
        output_dir,
      });
    }

    Ok(PackageBatch { release, packages })
  }
}

impl Action for PipelineAction {
  fn steps(&self, ctx: &ExecutionContext, entry: Option<&ConfigurationEntry>) -> Result<Vec<Step>, ActionError> {
    let mut steps = Vec::with_capacity(self.target.steps.len());

    for step in &self.target.steps {
      if let Some(names) = &step.package {
        steps.push(Step::Package(self.package_batch(names, ctx, entry)?));
      } else if let Some(path) = &step.params {
        let path = PathBuf::from(substitute(path, &ctx.resolver(entry))?);
        let params = ParameterFile::new(
          self.release()?,
          ctx.get_var("committer").unwrap_or_default(),
          ctx.get_var("integration_branch").unwrap_or_default(),
        );
        steps.push(Step::Params { path, params });
      } else {
        steps.push(Step::Command(self.command(step, ctx, entry)?));
      }
    }

    Ok(steps)
  }
}
