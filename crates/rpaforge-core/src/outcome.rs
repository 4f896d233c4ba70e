//! Engine reports and run outcomes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::record::OperationKind;

/// Result returned by the archive engine for one unit of work.
///
/// `success = false` means the unit failed with a reportable cause. The
/// engine returning nothing at all is a distinct, fatal condition and is
/// modeled as `None` at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    /// Whether the unit succeeded.
    pub success: bool,
    /// Engine-provided detail, surfaced verbatim on failure.
    pub message: String,
    /// Files the engine extracted or packed.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl EngineReport {
    /// Create a success report over the given files.
    pub fn ok(files: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            message: String::new(),
            files,
        }
    }

    /// Create a failure report with the given cause.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            files: Vec::new(),
        }
    }
}

/// Completion signal delivered to the caller that dispatched a run.
///
/// The progress channel's terminal record is the authoritative signal for
/// observers; this is the in-process counterpart for the dispatching side.
#[derive(Debug)]
pub struct RunOutcome {
    /// The direction the run executed in.
    pub kind: OperationKind,
    /// Human-readable result line.
    pub summary: String,
    /// The failure that ended the run, if any.
    pub error: Option<BatchError>,
}

impl RunOutcome {
    /// Create a successful outcome.
    pub fn success(kind: OperationKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            error: None,
        }
    }

    /// Create a failed outcome.
    pub fn failure(kind: OperationKind, error: BatchError) -> Self {
        let summary = match kind {
            OperationKind::Extract => "Extraction failed".to_string(),
            OperationKind::Create => "Creation failed".to_string(),
        };
        Self {
            kind,
            summary,
            error: Some(error),
        }
    }

    /// Whether the run completed without failure.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
