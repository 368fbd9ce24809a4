//! `key=value` parameter file for downstream jobs.

use std::io;
use std::path::Path;

use crate::util::fs::write_atomic;

use super::ReleaseInfo;

/// Release parameters handed to jobs triggered after this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterFile {
  pub version: String,
  pub release_id: String,
  pub committer: String,
  pub integration_branch: String,
  pub revision: String,
}

impl ParameterFile {
  pub fn new(release: &ReleaseInfo, committer: impl Into<String>, integration_branch: impl Into<String>) -> Self {
    Self {
      version: release.version.clone(),
      release_id: release.release_id.clone(),
      committer: committer.into(),
      integration_branch: integration_branch.into(),
      revision: release.commit.clone(),
    }
  }

  /// Render as `key=value` lines in a fixed order.
  pub fn render(&self) -> String {
    [
      ("version", &self.version),
      ("release_id", &self.release_id),
      ("committer", &self.committer),
      ("integration_branch", &self.integration_branch),
      ("revision", &self.revision),
    ]
    .iter()
    .map(|(key, value)| format!("{key}={value}\n"))
    .collect()
  }

  pub fn write(&self, path: &Path) -> io::Result<()> {
    write_atomic(path, self.render())
  }
}
