//! Runtime configuration.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for a conversion runtime.
///
/// The work directory holds the progress file and any staging directories;
/// it is shared between the dispatcher (writer) and observers (readers).
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ForgeConfig {
    /// Directory holding the progress file and staging areas.
    pub work_dir: PathBuf,

    /// File name of the progress record inside the work directory.
    #[builder(default = "default_progress_file()")]
    #[serde(default = "default_progress_file")]
    pub progress_file: String,
}

fn default_progress_file() -> String {
    "operation_progress.json".to_string()
}

impl ForgeConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref work_dir) = self.work_dir {
            if work_dir.as_os_str().is_empty() {
                return Err("Work directory cannot be empty".to_string());
            }
        } else {
            return Err("Work directory is required".to_string());
        }
        if let Some(ref name) = self.progress_file {
            if name.is_empty() {
                return Err("Progress file name cannot be empty".to_string());
            }
        }
        Ok(())
    }
}

impl ForgeConfig {
    /// Create a new config builder.
    pub fn builder() -> ForgeConfigBuilder {
        ForgeConfigBuilder::default()
    }

    /// Create a simple config rooted at a work directory.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            progress_file: default_progress_file(),
        }
    }

    /// Full path of the progress file.
    pub fn progress_path(&self) -> PathBuf {
        self.work_dir.join(&self.progress_file)
    }
}
