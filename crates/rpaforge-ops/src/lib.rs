//! Batch conversion engine for rpaforge.
//!
//! This crate sequences archive operations: it stages input for
//! multi-source creates, invokes the archive engine one unit at a time,
//! publishes progress through a persisted record polled by external
//! observers, and stops a batch at the first failing unit. Runs are
//! dispatched onto a single worker so no two runs ever interleave on the
//! progress channel.

mod channel;
mod dispatcher;
mod engine;
mod runner;
mod staging;

pub use channel::ProgressChannel;
pub use dispatcher::{DispatchError, OperationDispatcher};
pub use engine::{ArchiveEngine, CommandEngine};
pub use runner::BatchRunner;
pub use staging::StagingArea;

/// Dispatch queue depth: one run in flight, at most one queued behind it.
pub const DISPATCH_QUEUE_DEPTH: usize = 1;
