//! Error taxonomy for worker orchestration.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for worker orchestration operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors raised by the orchestration layer.
///
/// Transport failures on the control channel never appear here; the RPC client
/// folds them into an unsuccessful response instead.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker executable could not be started.
    #[error("failed to start worker process {path}: {source}")]
    ProcessLaunchFailure {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The worker never answered its readiness check.
    #[error("worker did not become ready; try disabling process isolation")]
    ReadinessTimeout,

    /// The worker refused the start request.
    #[error("worker rejected the start request")]
    StartRejected,

    /// The worker stopped answering polls but was still running.
    #[error("worker process became unresponsive and was terminated")]
    Unresponsive,

    /// The worker exited while a session was still active.
    #[error("worker process exited unexpectedly")]
    UnexpectedExit,

    /// The worker finished but its codec reported an error.
    #[error("worker reported error code {0}")]
    WorkerFailed(i32),

    /// One-time global codec initialisation did not finish in time.
    #[error("codec library initialisation timed out after {0:?}; hardware acceleration has been disabled")]
    InitializationTimeout(Duration),

    /// One-time global codec initialisation reported an error.
    #[error("codec library initialisation failed: {0}")]
    InitializationFailed(String),

    /// An instance was requested before `InstanceManager::init` succeeded.
    #[error("instance manager has not been initialised")]
    NotInitialized,

    /// No free local port could be found.
    #[error("no free local port available near {0}")]
    PortExhausted(u16),

    /// A session is already running on this orchestrator.
    #[error("a session is already active on this instance")]
    SessionActive,

    /// The in-process codec library cannot be used.
    #[error("in-process codec unavailable: {0}")]
    CodecUnavailable(String),

    /// Reading or writing persisted settings failed.
    #[error("settings error: {0}")]
    Settings(String),

    /// A request body could not be encoded.
    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WorkerError {
    /// Whether this error means the worker process is gone.
    pub fn is_worker_exited(&self) -> bool {
        matches!(self, WorkerError::UnexpectedExit)
    }
}
