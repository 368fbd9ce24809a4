//! Filesystem helpers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sibling temp path used while writing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
  let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  path.with_file_name(format!(".{name}.tmp"))
}

/// Write `contents` to `path` atomically: write a temp file next to it, then
/// rename over the destination. Readers see either the old or the new file.
pub fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent)?;
  }

  let temp = temp_path(path);
  fs::write(&temp, contents)?;
  fs::rename(&temp, path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn write_atomic_creates_parent_and_overwrites() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("logs").join("odp.log");

    write_atomic(&path, "first").unwrap();
    write_atomic(&path, "second").unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    assert!(!temp_path(&path).exists());
  }
}
