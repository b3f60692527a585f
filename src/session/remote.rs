use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::poller::{EmptyBody, PollOutcome, ProgressPoller};
use super::{
    CompletionCode, ProgressSnapshot, SessionEvents, SessionOptions, SessionState, SessionTracker,
};
use crate::error::{WorkerError, WorkerResult};
use crate::protocol::WorkerState;
use crate::rpc::RpcClient;
use crate::worker::WorkerProcess;

/// Plumbing shared by the scan and encode orchestrators: readiness, start
/// request, and the background poll loop.
#[derive(Debug)]
pub(crate) struct RemoteSession {
    pub(crate) rpc: Arc<RpcClient>,
    pub(crate) process: Arc<dyn WorkerProcess>,
    pub(crate) tracker: Arc<SessionTracker>,
    pub(crate) options: SessionOptions,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteSession {
    pub(crate) fn new(
        rpc: RpcClient,
        process: Arc<dyn WorkerProcess>,
        options: SessionOptions,
    ) -> (Self, SessionEvents) {
        let (tracker, events) = SessionTracker::new();
        let session = Self {
            rpc: Arc::new(rpc),
            process,
            tracker: Arc::new(tracker),
            options,
            poll_task: Mutex::new(None),
        };
        (session, events)
    }

    pub(crate) async fn is_server_running(&self) -> bool {
        self.rpc
            .wait_until_ready(self.options.ready_attempts, self.options.ready_timeout)
            .await
    }

    /// Begin a session and send its start request.
    ///
    /// Returns `Ok(false)` when the session already completed because the worker
    /// was not ready or refused the request.
    pub(crate) async fn open(&self, endpoint: &str, body: String) -> WorkerResult<bool> {
        if !self.tracker.begin() {
            return Err(WorkerError::SessionActive);
        }

        if !self.is_server_running().await {
            warn!(
                "Unable to connect to the worker (pid {}). Try disabling process isolation.",
                self.process.pid()
            );
            self.tracker.complete(CompletionCode::ServerNotRunning);
            return Ok(false);
        }

        self.tracker.advance(SessionState::Initializing);

        let response = self.rpc.post_json(endpoint, body).await;
        if !response.was_successful {
            // A dead worker explains the refusal.
            let code = if self.process.is_alive() {
                warn!(
                    "Unable to start job. The worker did not accept /{}; it may be blocked by security software.",
                    endpoint
                );
                CompletionCode::StartRejected
            } else {
                warn!(
                    "Worker process {} exited before accepting /{}",
                    self.process.pid(),
                    endpoint
                );
                self.process.terminate().await;
                CompletionCode::UnexpectedExit
            };
            self.tracker.complete(code);
            return Ok(false);
        }

        debug!("Worker accepted /{}", endpoint);
        Ok(true)
    }

    /// Run the poll loop on a background task.
    ///
    /// `finish` runs once the worker reports its work done and returns the code to
    /// complete the session with; results it fetches belong to the session.
    pub(crate) fn spawn_poll<S, F, Fut>(
        &self,
        endpoint: &'static str,
        empty: EmptyBody,
        snapshot: S,
        finish: F,
    ) where
        S: Fn(&WorkerState) -> Option<ProgressSnapshot> + Send + Sync + 'static,
        F: FnOnce(Arc<RpcClient>, Arc<dyn WorkerProcess>, WorkerState) -> Fut + Send + 'static,
        Fut: Future<Output = CompletionCode> + Send + 'static,
    {
        let rpc = Arc::clone(&self.rpc);
        let process = Arc::clone(&self.process);
        let tracker = Arc::clone(&self.tracker);
        let mut poller = ProgressPoller::new(self.options.poll);

        let task = tokio::spawn(async move {
            let outcome = poller
                .run(&rpc, process.as_ref(), endpoint, empty, |state| {
                    if let Some(progress) = snapshot(state) {
                        tracker.progress(progress);
                    }
                })
                .await;

            match outcome {
                PollOutcome::WorkDone(state) => {
                    tracker.advance(SessionState::WorkDone);
                    let code = finish(rpc, process, state).await;
                    tracker.advance(SessionState::ResultsFetched);
                    tracker.complete(code);
                }
                PollOutcome::Lost(code) => {
                    tracker.complete(code);
                }
            }
        });

        if let Some(previous) = self.poll_task.lock().replace(task) {
            // Only a finished session's loop can be here.
            previous.abort();
        }
    }

    /// Best-effort request that does not wait for the worker to act on it
    pub(crate) async fn send_command(&self, endpoint: &str) {
        if !self.rpc.is_ready() {
            debug!("Skipping /{}; worker was never ready", endpoint);
            return;
        }
        let response = self.rpc.get(endpoint).await;
        if !response.was_successful {
            debug!("/{} was not acknowledged", endpoint);
        }
    }

    /// Kill the worker and stop the poll loop.
    ///
    /// A session still in flight completes as an unexpected exit.
    pub(crate) async fn dispose(&self) {
        info!("Disposing worker process {}", self.process.pid());
        self.process.terminate().await;

        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Poll loop failed: {}", e);
                }
            }
        }

        if self.tracker.state() != SessionState::NotStarted {
            self.tracker.complete(CompletionCode::UnexpectedExit);
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
    }
}
