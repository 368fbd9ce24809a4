//! Packaging backends.

use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use super::{PackageDescriptor, PackagingError};

/// Name of the descriptor stored inside every tarball.
pub const DESCRIPTOR_FILENAME: &str = "PACKAGE.json";

/// Writes one package file for a descriptor and its artifact bundle.
pub trait PackagingBackend: Send + Sync {
  /// Write the package into `descriptor.output_dir` and return its path.
  fn write_package(&self, descriptor: &PackageDescriptor, bundle: &Path) -> Result<PathBuf, PackagingError>;
}

/// Default backend: `<name>-<version>.tar.gz` holding the bundle under the
/// install prefix plus a `PACKAGE.json` descriptor at the archive root.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarballBackend;

impl TarballBackend {
  pub fn file_name(descriptor: &PackageDescriptor) -> String {
    format!("{}.tar.gz", descriptor.file_stem())
  }
}

impl PackagingBackend for TarballBackend {
  fn write_package(&self, descriptor: &PackageDescriptor, bundle: &Path) -> Result<PathBuf, PackagingError> {
    let file_name = Self::file_name(descriptor);
    let path = descriptor.output_dir.join(&file_name);
    debug!(bundle = %bundle.display(), path = %path.display(), "writing tarball");

    // Unique per writer; removed on drop unless persisted.
    let temp = tempfile::Builder::new()
      .prefix(&format!(".{file_name}."))
      .suffix(".tmp")
      .tempfile_in(&descriptor.output_dir)?;
    let encoder = GzEncoder::new(temp, Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);

    let prefix = descriptor.prefix.strip_prefix("/").unwrap_or(&descriptor.prefix);
    let root = if prefix.as_os_str().is_empty() {
      Path::new(".")
    } else {
      prefix
    };
    archive.append_dir_all(root, bundle)?;

    let manifest = serde_json::to_vec_pretty(descriptor)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, DESCRIPTOR_FILENAME, manifest.as_slice())?;

    let temp = archive.into_inner()?.finish()?;
    temp.persist(&path).map_err(|e| e.error)?;

    Ok(path)
  }
}
