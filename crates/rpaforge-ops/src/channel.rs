//! File-backed progress channel.

use std::fs;
use std::path::{Path, PathBuf};

use rpaforge_core::{BatchError, ProgressRecord};

/// Persisted progress record shared between the runner and observers.
///
/// The runner is the sole writer at the batch level; the archive engine
/// writes item-level fields into the same file while a unit is running.
/// Observers poll `read` at their own cadence and must never be able to
/// see a partially written record, so every publish replaces the file via
/// a temp-file rename.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    path: PathBuf,
}

impl ProgressChannel {
    /// Create a channel backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing file, handed to the archive engine so its
    /// item-level updates land in the same record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove any existing record so no run observes leftover state.
    pub fn reset(&self) -> Result<(), BatchError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BatchError::ChannelWrite { source: e }),
        }
    }

    /// Persist the full record, replacing the previous content atomically
    /// from the observer's point of view.
    pub fn publish(&self, record: &ProgressRecord) -> Result<(), BatchError> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| BatchError::ChannelWrite {
                source: std::io::Error::other(e),
            })?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &bytes).map_err(|e| BatchError::ChannelWrite { source: e })?;
        fs::rename(&tmp, &self.path).map_err(|e| BatchError::ChannelWrite { source: e })?;
        Ok(())
    }

    /// Read the last published record.
    ///
    /// Missing, unreadable or unparsable content resolves to `None`; a
    /// read never fails for the observer.
    pub fn read(&self) -> Option<ProgressRecord> {
        let bytes = fs::read(&self.path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
