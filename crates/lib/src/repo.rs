//! Repository metadata.
//!
//! The release version of a run comes from the closest tag of the checked
//! out commit: `git describe --tags --long` yields `v1.2-7-gabc123`, which is
//! version `1.2` and release id `7` (commits since the tag).

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::exec::{CommandError, CommandInvocation, run_command};
use crate::package::ReleaseInfo;

#[derive(Debug, Error)]
pub enum RepoError {
  #[error("repository query failed: {0}")]
  Command(#[from] CommandError),

  #[error("unexpected `git describe` output: {0:?}")]
  Describe(String),

  #[error("repository query returned nothing: {0}")]
  Empty(String),
}

/// Source of release metadata for packaging.
pub trait Repository: Send + Sync {
  /// Version and release id of the checked out commit, with its full hash.
  fn release_info(&self) -> impl Future<Output = Result<ReleaseInfo, RepoError>> + Send;

  /// Full hash of the checked out commit.
  fn long_commit_hash(&self) -> impl Future<Output = Result<String, RepoError>> + Send;

  /// Committer name of the checked out commit.
  fn committer(&self) -> impl Future<Output = Result<String, RepoError>> + Send;
}

/// [`Repository`] backed by the `git` command line, run in the context's
/// working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
  ctx: Arc<ExecutionContext>,
}

impl GitCli {
  pub fn new(ctx: Arc<ExecutionContext>) -> Self {
    Self { ctx }
  }

  async fn git(&self, args: &[&str]) -> Result<String, RepoError> {
    let invocation = CommandInvocation::new("git").args(args.iter().copied());
    let output = run_command(&invocation, &self.ctx, None).await?;
    let line = output.stdout.trim().to_string();
    if line.is_empty() {
      return Err(RepoError::Empty(invocation.to_string()));
    }
    Ok(line)
  }
}

impl Repository for GitCli {
  async fn release_info(&self) -> Result<ReleaseInfo, RepoError> {
    let described = self.git(&["describe", "--tags", "--long"]).await?;
    let (version, release_id, _) = parse_describe(&described)?;
    let commit = self.long_commit_hash().await?;
    debug!(%version, %release_id, %commit, "release info");
    Ok(ReleaseInfo::new(version, release_id, commit))
  }

  async fn long_commit_hash(&self) -> Result<String, RepoError> {
    self.git(&["rev-parse", "HEAD"]).await
  }

  async fn committer(&self) -> Result<String, RepoError> {
    self.git(&["log", "-1", "--format=%cn"]).await
  }
}

/// Split `git describe --long` output into (version, release id, short
/// hash). A leading `v` on the tag is dropped; tags may contain `-`.
pub fn parse_describe(described: &str) -> Result<(String, String, String), RepoError> {
  let malformed = || RepoError::Describe(described.to_string());

  let mut parts = described.trim().rsplitn(3, '-');
  let hash = parts.next().and_then(|h| h.strip_prefix('g')).ok_or_else(malformed)?;
  let count = parts.next().ok_or_else(malformed)?;
  let tag = parts.next().ok_or_else(malformed)?;

  if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) || hash.is_empty() {
    return Err(malformed());
  }

  let version = tag.strip_prefix('v').unwrap_or(tag);
  if version.is_empty() {
    return Err(malformed());
  }

  Ok((version.to_string(), count.to_string(), hash.to_string()))
}
