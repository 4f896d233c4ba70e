//! Error types for batch runs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can end a batch run, or in the channel case, degrade it.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The archive engine returned no result at all.
    #[error("engine returned no result")]
    EngineAbsent,

    /// The archive engine failed internally before producing a result.
    #[error("engine failure: {message}")]
    Engine { message: String },

    /// One unit of the batch reported failure.
    #[error("{message}")]
    Unit {
        index: u32,
        total: u32,
        message: String,
    },

    /// Staging directory could not be created or populated.
    #[error("staging failed at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Progress persistence failed. Advisory; never fatal to the run.
    #[error("progress write failed: {source}")]
    ChannelWrite {
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled between units.
    #[error("operation cancelled")]
    Cancelled,
}

impl BatchError {
    /// Create a unit failure carrying the engine's message verbatim.
    pub fn unit(index: u32, total: u32, message: impl Into<String>) -> Self {
        Self::Unit {
            index,
            total,
            message: message.into(),
        }
    }

    /// Create a staging error with path context.
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }
}
