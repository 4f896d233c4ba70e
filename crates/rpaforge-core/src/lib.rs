//! Core types for rpaforge.
//!
//! This crate provides the fundamental data structures shared between the
//! conversion engine and its callers: operation requests, the persisted
//! progress record, run outcomes, and configuration.

mod config;
mod error;
mod outcome;
mod record;
mod request;

pub use config::{ForgeConfig, ForgeConfigBuilder};
pub use error::BatchError;
pub use outcome::{EngineReport, RunOutcome};
pub use record::{now_millis, OperationKind, OperationStatus, ProgressRecord};
pub use request::{OperationRequest, DEFAULT_FORMAT_VERSION, DEFAULT_KEY};
