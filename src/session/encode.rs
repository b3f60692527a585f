use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use super::poller::EmptyBody;
use super::remote::RemoteSession;
use super::{CompletionCode, ProgressSnapshot, SessionEvents, SessionOptions, SessionState};
use crate::error::WorkerResult;
use crate::job::{EncodeJob, EncodeRequest};
use crate::protocol::endpoints;
use crate::rpc::RpcClient;
use crate::worker::WorkerProcess;

/// Drives a single encode on one isolated worker.
///
/// The worker is terminated as soon as it reports the encode done.
#[derive(Debug)]
pub struct EncodeOrchestrator {
    remote: RemoteSession,
    outcome: Arc<Mutex<Option<CompletionCode>>>,
}

impl EncodeOrchestrator {
    pub fn new(
        rpc: RpcClient,
        process: Arc<dyn WorkerProcess>,
        options: SessionOptions,
    ) -> (Self, SessionEvents) {
        let (remote, events) = RemoteSession::new(rpc, process, options);
        let orchestrator = Self {
            remote,
            outcome: Arc::new(Mutex::new(None)),
        };
        (orchestrator, events)
    }

    pub async fn start(&self, job: &EncodeJob) -> WorkerResult<()> {
        let request = EncodeRequest {
            initialise_command: self.remote.options.init.clone(),
            encode_job: &job.document,
        };
        let body = serde_json::to_string(&request)?;

        info!("Starting encode {:?} -> {:?}", job.source, job.destination);
        if !self.remote.open(endpoints::START_ENCODE, body).await? {
            return Ok(());
        }

        let outcome = Arc::clone(&self.outcome);
        self.remote.spawn_poll(
            endpoints::POLL_ENCODE_PROGRESS,
            EmptyBody::Failure,
            ProgressSnapshot::from_encode_state,
            move |_rpc, process, state| async move {
                let error = state.work_done.map(|done| done.error).unwrap_or_default();
                if error != 0 {
                    warn!("Worker finished encode with error {}", error);
                }
                process.terminate().await;

                let code = CompletionCode::from_worker(error);
                *outcome.lock() = Some(code);
                code
            },
        );
        Ok(())
    }

    /// Ask the worker to cancel the encode
    pub async fn stop(&self) {
        self.remote.send_command(endpoints::STOP_ENCODE).await;
    }

    pub async fn pause(&self) {
        self.remote.send_command(endpoints::PAUSE_ENCODE).await;
    }

    pub async fn resume(&self) {
        self.remote.send_command(endpoints::RESUME_ENCODE).await;
    }

    /// Worker-reported outcome of the finished encode
    pub fn outcome(&self) -> Option<CompletionCode> {
        *self.outcome.lock()
    }

    pub fn state(&self) -> SessionState {
        self.remote.tracker.state()
    }

    pub async fn dispose(&self) {
        self.remote.dispose().await;
    }
}
