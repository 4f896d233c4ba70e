//! Archive engine boundary.

use std::path::{Path, PathBuf};
use std::process::Command;

use rpaforge_core::EngineReport;

/// The archive engine consumed by the batch runner.
///
/// Both operations receive the progress file path so the engine can write
/// item-level counters (`totalFiles`, `processedFiles`, `currentFile`)
/// into the record the runner is using for batch-level fields. Returning
/// `None` means the engine produced no result at all, which the runner
/// treats as fatal rather than as a soft failure.
pub trait ArchiveEngine: Send + Sync {
    /// Extract one archive into a destination directory.
    fn extract(&self, archive: &Path, dest_dir: &Path, progress_path: &Path)
        -> Option<EngineReport>;

    /// Pack one source directory into an archive.
    fn create(
        &self,
        source_dir: &Path,
        output: &Path,
        format_version: u32,
        key: u32,
        progress_path: &Path,
    ) -> Option<EngineReport>;
}

/// Adapter invoking an external engine executable.
///
/// The executable is expected to print exactly one JSON report object
/// (`{"success": bool, "message": string, "files": [path, ...]}`) on
/// stdout. Spawn failures and unparsable output both surface as `None`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
}

impl CommandEngine {
    /// Create an adapter for the engine executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: Vec<String>) -> Option<EngineReport> {
        let output = match Command::new(&self.program).args(&args).output() {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("failed to spawn engine {}: {e}", self.program.display());
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!("engine exited with {}", output.status);
        }

        match serde_json::from_slice(&output.stdout) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("unparsable engine report: {e}");
                None
            }
        }
    }
}

impl ArchiveEngine for CommandEngine {
    fn extract(
        &self,
        archive: &Path,
        dest_dir: &Path,
        progress_path: &Path,
    ) -> Option<EngineReport> {
        self.run(vec![
            "extract".to_string(),
            archive.display().to_string(),
            dest_dir.display().to_string(),
            "--progress-file".to_string(),
            progress_path.display().to_string(),
        ])
    }

    fn create(
        &self,
        source_dir: &Path,
        output: &Path,
        format_version: u32,
        key: u32,
        progress_path: &Path,
    ) -> Option<EngineReport> {
        self.run(vec![
            "create".to_string(),
            source_dir.display().to_string(),
            output.display().to_string(),
            "--format-version".to_string(),
            format_version.to_string(),
            "--key".to_string(),
            key.to_string(),
            "--progress-file".to_string(),
            progress_path.display().to_string(),
        ])
    }
}
