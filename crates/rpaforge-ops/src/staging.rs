//! Staging area for multi-source archive creation.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use rpaforge_core::BatchError;

/// Prefix of staging directory names under the work directory.
const STAGING_PREFIX: &str = "rpaforge-staging-";

/// An isolated directory aggregating multiple sources before one create.
///
/// The directory is uniquely named per run and removed when the value is
/// dropped, so cleanup holds on every exit path of the run that created
/// it. The normal path calls `close` instead so removal errors surface.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Allocate a fresh staging directory under `parent`.
    pub fn create(parent: &Path) -> Result<Self, BatchError> {
        fs::create_dir_all(parent).map_err(|e| BatchError::staging(parent, e))?;

        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| BatchError::staging(parent, e))?;

        Ok(Self { dir })
    }

    /// Root of the staging directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy a file or directory tree under the staging root as `name_hint`.
    ///
    /// Directories are copied recursively preserving structure; files are
    /// copied byte-for-byte. The first I/O failure aborts the copy.
    pub fn copy_into(&self, source: &Path, name_hint: &str) -> Result<PathBuf, BatchError> {
        let dest = self.dir.path().join(name_hint);

        let bytes = if source.is_dir() {
            copy_dir_recursive(source, &dest)
        } else {
            copy_file(source, &dest)
        }
        .map_err(|e| BatchError::staging(source, e))?;

        tracing::debug!(
            "staged {} ({} bytes) at {}",
            source.display(),
            bytes,
            dest.display()
        );
        Ok(dest)
    }

    /// Remove the staging directory, surfacing removal errors.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Copy a single file, returning its size.
fn copy_file(source: &Path, dest: &Path) -> std::io::Result<u64> {
    fs::copy(source, dest)
}

/// Recursively copy a directory tree, returning total bytes copied.
fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<u64> {
    fs::create_dir_all(dest)?;

    let mut total_bytes = 0u64;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if path.is_dir() {
            total_bytes += copy_dir_recursive(&path, &dest_path)?;
        } else {
            total_bytes += copy_file(&path, &dest_path)?;
        }
    }

    Ok(total_bytes)
}
