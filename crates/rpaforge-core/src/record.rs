//! The persisted progress record shared with external observers.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as epoch milliseconds, the unit used for record timestamps.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The direction of an archive operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Extract,
    Create,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extract => write!(f, "Extract"),
            Self::Create => write!(f, "Create"),
        }
    }
}

/// Status of the run that owns the record. Terminal once completed or failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl OperationStatus {
    /// Whether this status ends the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of one in-flight operation, persisted as a flat JSON object.
///
/// The record has two writers with disjoint field ownership: the batch
/// runner owns `status`, the batch fields and `errorMessage`, while the
/// archive engine updates `totalFiles`, `processedFiles` and `currentFile`
/// while a single unit is running. Observers poll the file and must get a
/// usable record out of any subset of keys, so every field defaults on
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressRecord {
    /// Whether the run extracts archives or creates one.
    pub operation: OperationKind,
    /// Run status; terminal once completed or failed.
    pub status: OperationStatus,
    /// Epoch milliseconds when the run started.
    pub start_time: i64,
    /// Epoch milliseconds of the latest write, never before `start_time`.
    pub last_update_time: i64,
    /// Engine-reported file total for the current unit.
    pub total_files: u64,
    /// Engine-reported files processed for the current unit.
    pub processed_files: u64,
    /// Human-readable description of the current activity.
    pub current_file: String,
    /// 1-based index of the unit currently processing, 0 outside a batch.
    pub current_batch_index: u32,
    /// Number of units in the batch, 0 for a single operation.
    pub total_batch_count: u32,
    /// Name of the unit currently processing.
    pub current_batch_file_name: String,
    /// Failure cause, non-empty only when `status` is failed.
    pub error_message: String,
}

impl ProgressRecord {
    /// Create an in-progress record for a run starting now.
    pub fn begin(operation: OperationKind) -> Self {
        let now = now_millis();
        Self {
            operation,
            status: OperationStatus::InProgress,
            start_time: now,
            last_update_time: now,
            ..Self::default()
        }
    }

    /// Refresh `last_update_time`, clamped so it never precedes the start.
    pub fn touch(&mut self) {
        self.last_update_time = now_millis().max(self.start_time);
    }

    pub fn is_completed(&self) -> bool {
        self.status == OperationStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    /// Milliseconds between start and the latest write.
    pub fn elapsed_ms(&self) -> i64 {
        (self.last_update_time - self.start_time).max(0)
    }

    /// Unit-level progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_files > 0 {
            (self.processed_files as f64 / self.total_files as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Whether the record belongs to a multi-unit batch.
    pub fn is_batch(&self) -> bool {
        self.total_batch_count > 0
    }
}
