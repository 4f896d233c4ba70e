//! Async entry point dispatching runs onto a single worker.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use rpaforge_core::{BatchError, ForgeConfig, OperationRequest, RunOutcome};

use crate::channel::ProgressChannel;
use crate::engine::ArchiveEngine;
use crate::runner::BatchRunner;
use crate::DISPATCH_QUEUE_DEPTH;

/// Errors raised at the dispatch boundary, before a run starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// A run is in flight and the queue slot behind it is taken.
    #[error("a conversion is already running")]
    Busy,
    /// The worker has shut down.
    #[error("dispatcher is shut down")]
    Closed,
    /// The request carries no input paths.
    #[error("request contains no input paths")]
    EmptyRequest,
}

struct DispatchJob {
    request: OperationRequest,
    done: oneshot::Sender<RunOutcome>,
}

/// Accepts operation requests and runs them strictly one at a time.
///
/// Construction spawns one worker task owning the runner; requests queue
/// behind the in-flight run on a bounded channel of depth
/// [`DISPATCH_QUEUE_DEPTH`], so no two runs ever interleave their writes
/// to the progress channel. Dispatching never blocks the caller: the
/// outcome arrives on the returned receiver, and observers follow the
/// progress channel independently.
///
/// Must be constructed inside a tokio runtime.
pub struct OperationDispatcher {
    tx: mpsc::Sender<DispatchJob>,
    cancel: CancellationToken,
}

impl OperationDispatcher {
    /// Spawn the worker over the given engine and configuration.
    pub fn new(engine: Arc<dyn ArchiveEngine>, config: &ForgeConfig) -> Self {
        let cancel = CancellationToken::new();
        let runner = Arc::new(
            BatchRunner::new(
                engine,
                ProgressChannel::new(config.progress_path()),
                config.work_dir.clone(),
            )
            .with_cancellation(cancel.clone()),
        );

        let (tx, mut rx) = mpsc::channel::<DispatchJob>(DISPATCH_QUEUE_DEPTH);

        tokio::spawn(async move {
            while let Some(DispatchJob { request, done }) = rx.recv().await {
                let kind = request.kind();
                let runner = Arc::clone(&runner);

                let outcome =
                    match tokio::task::spawn_blocking(move || run_request(&runner, request)).await
                    {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!("conversion worker failed: {e}");
                            RunOutcome::failure(
                                kind,
                                BatchError::Engine {
                                    message: e.to_string(),
                                },
                            )
                        }
                    };

                // The caller may have dropped its receiver; the progress
                // channel still carries the terminal record.
                let _ = done.send(outcome);
            }
        });

        Self { tx, cancel }
    }

    /// Enqueue a request without blocking. Returns a receiver for the
    /// run's outcome, or an error if the request is empty or the worker
    /// is saturated.
    pub fn dispatch(
        &self,
        request: OperationRequest,
    ) -> Result<oneshot::Receiver<RunOutcome>, DispatchError> {
        if request.is_empty() {
            return Err(DispatchError::EmptyRequest);
        }

        let (done, outcome) = oneshot::channel();
        self.tx
            .try_send(DispatchJob { request, done })
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Busy,
                TrySendError::Closed(_) => DispatchError::Closed,
            })?;
        Ok(outcome)
    }

    /// Dispatch an extraction of one or many archives.
    pub fn run_extract(
        &self,
        archives: Vec<PathBuf>,
        destination: PathBuf,
    ) -> Result<oneshot::Receiver<RunOutcome>, DispatchError> {
        self.dispatch(OperationRequest::extract(archives, destination))
    }

    /// Dispatch a creation from one or many sources.
    pub fn run_create(
        &self,
        sources: Vec<PathBuf>,
        output: PathBuf,
        format_version: u32,
        key: u32,
    ) -> Result<oneshot::Receiver<RunOutcome>, DispatchError> {
        self.dispatch(OperationRequest::create(sources, output, format_version, key))
    }

    /// Request cooperative cancellation; the in-flight run stops at the
    /// next unit boundary.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The one place aware of single vs batch: route on request cardinality.
fn run_request(runner: &BatchRunner, request: OperationRequest) -> RunOutcome {
    match request {
        OperationRequest::Extract {
            archives,
            destination,
        } => {
            if archives.len() > 1 {
                runner.extract_batch(&archives, &destination)
            } else {
                runner.extract_single(&archives[0], &destination)
            }
        }
        OperationRequest::Create {
            sources,
            output,
            format_version,
            key,
        } => {
            if sources.len() > 1 {
                runner.create_batch(&sources, &output, format_version, key)
            } else {
                runner.create_single(&sources[0], &output, format_version, key)
            }
        }
    }
}
