//! Package assembly.
//!
//! Turns built artifact bundles plus one shared [`ReleaseInfo`] into
//! versioned [`PackageDescriptor`]s and hands each one to a
//! [`PackagingBackend`]. Packages produced in the same batch can depend on
//! each other; those dependencies are pinned to the exact `full_version`.

pub mod backend;
pub mod params;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use backend::{PackagingBackend, TarballBackend};
pub use params::ParameterFile;

/// Errors raised while assembling packages.
#[derive(Debug, Error)]
pub enum PackagingError {
  #[error("artifact bundle not found for package {package}: {path}")]
  MissingBundle { package: String, path: PathBuf },

  #[error("failed to create output directory {path}: {source}")]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("package {package} depends on {sibling}, which is not part of this batch")]
  UnknownSibling { package: String, sibling: String },

  #[error("failed to serialize package descriptor: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Version metadata derived once per run from the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseInfo {
  pub version: String,
  pub release_id: String,
  pub commit: String,
}

impl ReleaseInfo {
  pub fn new(version: impl Into<String>, release_id: impl Into<String>, commit: impl Into<String>) -> Self {
    Self {
      version: version.into(),
      release_id: release_id.into(),
      commit: commit.into(),
    }
  }

  /// Canonical package version: `{version}-{release_id}`.
  pub fn full_version(&self) -> String {
    format!("{}-{}", self.version, self.release_id)
  }
}

/// Version constraint operator of a package dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionOp {
  #[serde(rename = "=")]
  Eq,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = "<")]
  Lt,
}

impl fmt::Display for VersionOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self {
      VersionOp::Eq => "=",
      VersionOp::Ge => ">=",
      VersionOp::Le => "<=",
      VersionOp::Gt => ">",
      VersionOp::Lt => "<",
    };
    f.write_str(op)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
  pub name: String,
  pub op: VersionOp,
  pub version: String,
}

impl PackageDependency {
  pub fn new(name: impl Into<String>, op: VersionOp, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      op,
      version: version.into(),
    }
  }
}

impl fmt::Display for PackageDependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({} {})", self.name, self.op, self.version)
  }
}

/// Everything the packaging backend needs to know about one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDescriptor {
  pub name: String,
  pub release: ReleaseInfo,
  pub version: String,
  pub description: String,
  pub prefix: PathBuf,
  pub depends: Vec<PackageDependency>,
  pub output_dir: PathBuf,
}

impl PackageDescriptor {
  /// `{name}-{full_version}`, the stem of every file written for it.
  pub fn file_stem(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

/// Per-package metadata supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
  pub name: String,
  /// Directory holding the built artifacts to package.
  pub bundle: PathBuf,
  pub description: String,
  pub prefix: PathBuf,
  pub depends: Vec<PackageDependency>,
  /// Packages of the same batch this one requires at exactly the same
  /// version.
  pub siblings: Vec<String>,
  pub output_dir: PathBuf,
}

/// A set of packages sharing one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBatch {
  pub release: ReleaseInfo,
  pub packages: Vec<PackageSpec>,
}

/// Build the descriptors of a batch without writing anything.
///
/// # Errors
///
/// [`PackagingError::UnknownSibling`] when a sibling dependency names a
/// package outside the batch.
pub fn describe(batch: &PackageBatch) -> Result<Vec<PackageDescriptor>, PackagingError> {
  let names: HashSet<&str> = batch.packages.iter().map(|p| p.name.as_str()).collect();
  let version = batch.release.full_version();

  batch
    .packages
    .iter()
    .map(|spec| {
      let mut depends = spec.depends.clone();
      for sibling in &spec.siblings {
        if !names.contains(sibling.as_str()) {
          return Err(PackagingError::UnknownSibling {
            package: spec.name.clone(),
            sibling: sibling.clone(),
          });
        }
        depends.push(PackageDependency::new(sibling.clone(), VersionOp::Eq, version.clone()));
      }

      Ok(PackageDescriptor {
        name: spec.name.clone(),
        release: batch.release.clone(),
        version: version.clone(),
        description: spec.description.clone(),
        prefix: spec.prefix.clone(),
        depends,
        output_dir: spec.output_dir.clone(),
      })
    })
    .collect()
}

/// Assemble every package of `batch` with `backend`.
///
/// Bundles are checked up front so a missing one fails the batch before any
/// file is written. Output directories are created if absent; existing
/// packages with the same name and version are overwritten.
pub fn assemble(batch: &PackageBatch, backend: &dyn PackagingBackend) -> Result<Vec<PathBuf>, PackagingError> {
  for spec in &batch.packages {
    if !spec.bundle.is_dir() {
      return Err(PackagingError::MissingBundle {
        package: spec.name.clone(),
        path: spec.bundle.clone(),
      });
    }
  }

  let descriptors = describe(batch)?;
  let mut written = Vec::with_capacity(descriptors.len());

  for (descriptor, spec) in descriptors.iter().zip(&batch.packages) {
    ensure_output_dir(&descriptor.output_dir)?;
    let path = backend.write_package(descriptor, &spec.bundle)?;
    info!(package = %descriptor.name, version = %descriptor.version, path = %path.display(), "package written");
    written.push(path);
  }

  Ok(written)
}

fn ensure_output_dir(path: &Path) -> Result<(), PackagingError> {
  std::fs::create_dir_all(path).map_err(|source| PackagingError::OutputDir {
    path: path.to_path_buf(),
    source,
  })
}
