//! Batch runner: sequences units, publishes progress, fails fast.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rpaforge_core::{
    now_millis, BatchError, OperationKind, OperationStatus, ProgressRecord, RunOutcome,
};

use crate::channel::ProgressChannel;
use crate::engine::ArchiveEngine;
use crate::staging::StagingArea;

/// Runs one request to completion or first failure.
///
/// Progress writes for a unit strictly precede its engine invocation,
/// which strictly precedes the write resolving it; units run one after
/// another. A failing unit ends the batch with the last good state still
/// visible in the terminal record. Channel write failures are advisory
/// and never end a run.
pub struct BatchRunner {
    engine: Arc<dyn ArchiveEngine>,
    channel: ProgressChannel,
    staging_parent: PathBuf,
    cancel: CancellationToken,
}

impl BatchRunner {
    /// Create a runner over the given engine and progress channel.
    /// Staging directories for multi-source creates live under
    /// `staging_parent`.
    pub fn new(
        engine: Arc<dyn ArchiveEngine>,
        channel: ProgressChannel,
        staging_parent: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            channel,
            staging_parent: staging_parent.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token, checked between units only; the
    /// engine call itself is opaque and runs to completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Extract one archive into a destination directory.
    pub fn extract_single(&self, archive: &Path, destination: &Path) -> RunOutcome {
        self.reset_channel();
        let start = now_millis();

        if self.cancel.is_cancelled() {
            return self.cancelled(OperationKind::Extract, start, 0, 0, "");
        }

        self.publish(&ProgressRecord {
            operation: OperationKind::Extract,
            status: OperationStatus::InProgress,
            start_time: start,
            last_update_time: now_millis().max(start),
            current_file: "Starting extraction...".to_string(),
            ..ProgressRecord::default()
        });

        match self.engine.extract(archive, destination, self.channel.path()) {
            None => {
                let error = BatchError::EngineAbsent;
                self.publish_failed(
                    OperationKind::Extract,
                    start,
                    0,
                    0,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Extract, error)
            }
            Some(report) if !report.success => {
                let error = BatchError::unit(0, 0, report.message);
                self.publish_failed(
                    OperationKind::Extract,
                    start,
                    0,
                    0,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Extract, error)
            }
            Some(report) => {
                let files = report.files.len();
                self.publish(&ProgressRecord {
                    operation: OperationKind::Extract,
                    status: OperationStatus::Completed,
                    start_time: start,
                    last_update_time: now_millis().max(start),
                    total_files: files as u64,
                    processed_files: files as u64,
                    current_file: "Complete".to_string(),
                    ..ProgressRecord::default()
                });
                RunOutcome::success(OperationKind::Extract, format!("Extracted {files} files"))
            }
        }
    }

    /// Extract a batch of archives into one shared destination,
    /// stopping at the first failing archive.
    pub fn extract_batch(&self, archives: &[PathBuf], destination: &Path) -> RunOutcome {
        self.reset_channel();
        let start = now_millis();
        let total = archives.len() as u32;

        for (i, archive) in archives.iter().enumerate() {
            let index = i as u32 + 1;
            let name = display_name(archive);

            if self.cancel.is_cancelled() {
                return self.cancelled(OperationKind::Extract, start, index, total, &name);
            }

            self.publish(&ProgressRecord {
                operation: OperationKind::Extract,
                status: OperationStatus::InProgress,
                start_time: start,
                last_update_time: now_millis().max(start),
                current_batch_index: index,
                total_batch_count: total,
                current_batch_file_name: name.clone(),
                current_file: "Starting extraction...".to_string(),
                ..ProgressRecord::default()
            });

            let error = match self.engine.extract(archive, destination, self.channel.path()) {
                None => Some(BatchError::EngineAbsent),
                Some(report) if !report.success => {
                    Some(BatchError::unit(index, total, report.message))
                }
                Some(_) => None,
            };

            if let Some(error) = error {
                self.publish_failed(
                    OperationKind::Extract,
                    start,
                    index,
                    total,
                    &name,
                    format!("Error on file {index}/{total}: {error}"),
                );
                return RunOutcome::failure(OperationKind::Extract, error);
            }
        }

        self.publish(&ProgressRecord {
            operation: OperationKind::Extract,
            status: OperationStatus::Completed,
            start_time: start,
            last_update_time: now_millis().max(start),
            total_files: u64::from(total),
            processed_files: u64::from(total),
            current_file: "Complete".to_string(),
            current_batch_index: total,
            total_batch_count: total,
            ..ProgressRecord::default()
        });

        RunOutcome::success(
            OperationKind::Extract,
            format!("Extracted {total} archives"),
        )
    }

    /// Pack one source directory into an archive.
    pub fn create_single(
        &self,
        source: &Path,
        output: &Path,
        format_version: u32,
        key: u32,
    ) -> RunOutcome {
        self.reset_channel();
        let start = now_millis();

        if self.cancel.is_cancelled() {
            return self.cancelled(OperationKind::Create, start, 0, 0, "");
        }

        self.publish(&ProgressRecord {
            operation: OperationKind::Create,
            status: OperationStatus::InProgress,
            start_time: start,
            last_update_time: now_millis().max(start),
            current_file: "Starting creation...".to_string(),
            ..ProgressRecord::default()
        });

        let result = self
            .engine
            .create(source, output, format_version, key, self.channel.path());

        match result {
            None => {
                let error = BatchError::EngineAbsent;
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    0,
                    0,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Create, error)
            }
            Some(report) if !report.success => {
                let error = BatchError::unit(0, 0, report.message);
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    0,
                    0,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Create, error)
            }
            Some(report) => {
                let files = report.files.len();
                self.publish(&ProgressRecord {
                    operation: OperationKind::Create,
                    status: OperationStatus::Completed,
                    start_time: start,
                    last_update_time: now_millis().max(start),
                    total_files: files as u64,
                    processed_files: files as u64,
                    current_file: "Complete".to_string(),
                    ..ProgressRecord::default()
                });
                RunOutcome::success(
                    OperationKind::Create,
                    format!("Created archive with {files} files"),
                )
            }
        }
    }

    /// Merge several sources into one archive: stage everything into an
    /// isolated directory, then hand the staging root to the engine. The
    /// staging directory is removed on every exit path.
    pub fn create_batch(
        &self,
        sources: &[PathBuf],
        output: &Path,
        format_version: u32,
        key: u32,
    ) -> RunOutcome {
        self.reset_channel();
        let start = now_millis();
        let total = sources.len() as u32;

        let staging = match StagingArea::create(&self.staging_parent) {
            Ok(staging) => staging,
            Err(error) => {
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    0,
                    total,
                    "",
                    format!("Error: {error}"),
                );
                return RunOutcome::failure(OperationKind::Create, error);
            }
        };

        for (i, source) in sources.iter().enumerate() {
            let index = i as u32 + 1;
            let name = display_name(source);

            if self.cancel.is_cancelled() {
                return self.cancelled(OperationKind::Create, start, index, total, &name);
            }

            self.publish(&ProgressRecord {
                operation: OperationKind::Create,
                status: OperationStatus::InProgress,
                start_time: start,
                last_update_time: now_millis().max(start),
                current_batch_index: index,
                total_batch_count: total,
                current_batch_file_name: name.clone(),
                current_file: format!("Copying to staging: {name}"),
                ..ProgressRecord::default()
            });

            if let Err(error) = staging.copy_into(source, &name) {
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    index,
                    total,
                    &name,
                    format!("Error: {error}"),
                );
                return RunOutcome::failure(OperationKind::Create, error);
            }
        }

        self.publish(&ProgressRecord {
            operation: OperationKind::Create,
            status: OperationStatus::InProgress,
            start_time: start,
            last_update_time: now_millis().max(start),
            current_batch_index: total,
            total_batch_count: total,
            current_batch_file_name: "Creating final archive...".to_string(),
            current_file: format!("Building archive from {total} items"),
            ..ProgressRecord::default()
        });

        let result = self.engine.create(
            staging.path(),
            output,
            format_version,
            key,
            self.channel.path(),
        );

        let outcome = match result {
            None => {
                let error = BatchError::EngineAbsent;
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    total,
                    total,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Create, error)
            }
            Some(report) if !report.success => {
                let error = BatchError::unit(total, total, report.message);
                self.publish_failed(
                    OperationKind::Create,
                    start,
                    total,
                    total,
                    "",
                    format!("Error: {error}"),
                );
                RunOutcome::failure(OperationKind::Create, error)
            }
            Some(report) => {
                let files = report.files.len();
                self.publish(&ProgressRecord {
                    operation: OperationKind::Create,
                    status: OperationStatus::Completed,
                    start_time: start,
                    last_update_time: now_millis().max(start),
                    total_files: files as u64,
                    processed_files: files as u64,
                    current_file: "Complete".to_string(),
                    current_batch_index: total,
                    total_batch_count: total,
                    ..ProgressRecord::default()
                });
                RunOutcome::success(
                    OperationKind::Create,
                    format!("Created archive with {files} files from {total} sources"),
                )
            }
        };

        if let Err(e) = staging.close() {
            tracing::warn!("could not remove staging directory: {e}");
        }
        outcome
    }

    fn cancelled(
        &self,
        operation: OperationKind,
        start: i64,
        index: u32,
        total: u32,
        name: &str,
    ) -> RunOutcome {
        let error = BatchError::Cancelled;
        self.publish_failed(operation, start, index, total, name, format!("Error: {error}"));
        RunOutcome::failure(operation, error)
    }

    fn publish_failed(
        &self,
        operation: OperationKind,
        start: i64,
        index: u32,
        total: u32,
        name: &str,
        message: String,
    ) {
        self.publish(&ProgressRecord {
            operation,
            status: OperationStatus::Failed,
            start_time: start,
            last_update_time: now_millis().max(start),
            current_batch_index: index,
            total_batch_count: total,
            current_batch_file_name: name.to_string(),
            error_message: message,
            ..ProgressRecord::default()
        });
    }

    /// Progress is advisory; a write failure is logged and dropped.
    fn publish(&self, record: &ProgressRecord) {
        if let Err(e) = self.channel.publish(record) {
            tracing::warn!("dropping progress update: {e}");
        }
    }

    fn reset_channel(&self) {
        if let Err(e) = self.channel.reset() {
            tracing::warn!("could not clear previous progress record: {e}");
        }
    }
}

/// File name of a unit for display, falling back to the full path.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
