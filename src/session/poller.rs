use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::CompletionCode;
use crate::config::PollPolicy;
use crate::protocol::{TaskState, WorkerState};
use crate::rpc::RpcClient;
use crate::worker::WorkerProcess;

/// What to make of a successful poll with no body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyBody {
    /// The worker has no data yet
    Skip,
    /// Count it as a failed poll
    Failure,
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Continue,
    Progress(WorkerState),
    Done(WorkerState),
    Lost(CompletionCode),
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    WorkDone(WorkerState),
    Lost(CompletionCode),
}

/// Polls a worker's progress endpoint until the work is done or the worker is lost.
///
/// Ticks run one after another on a single loop, so the processing of one poll
/// never overlaps the next.
#[derive(Debug)]
pub struct ProgressPoller {
    policy: PollPolicy,
    retry_count: u32,
}

impl ProgressPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            retry_count: 0,
        }
    }

    /// Consecutive failed polls since the last success
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Poll on the configured interval until a terminal outcome
    pub async fn run<F>(
        &mut self,
        rpc: &RpcClient,
        process: &dyn WorkerProcess,
        endpoint: &str,
        empty: EmptyBody,
        mut on_progress: F,
    ) -> PollOutcome
    where
        F: FnMut(&WorkerState) + Send,
    {
        let mut ticker = time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.tick(rpc, process, endpoint, empty).await {
                Tick::Continue => {}
                Tick::Progress(state) => on_progress(&state),
                Tick::Done(state) => return PollOutcome::WorkDone(state),
                Tick::Lost(code) => return PollOutcome::Lost(code),
            }
        }
    }

    /// Issue one poll and apply the retry policy to its result
    pub async fn tick(
        &mut self,
        rpc: &RpcClient,
        process: &dyn WorkerProcess,
        endpoint: &str,
        empty: EmptyBody,
    ) -> Tick {
        let response = rpc.get(endpoint).await;
        if !response.was_successful {
            return self.failed(process).await;
        }

        let Some(body) = response.content() else {
            return match empty {
                EmptyBody::Skip => {
                    self.retry_count = 0;
                    Tick::Continue
                }
                EmptyBody::Failure => self.failed(process).await,
            };
        };

        let state: WorkerState = match serde_json::from_str(body) {
            Ok(state) => state,
            Err(e) => {
                debug!("Unreadable progress from /{}: {}", endpoint, e);
                return self.failed(process).await;
            }
        };

        self.retry_count = 0;
        if state.state == TaskState::WorkDone {
            Tick::Done(state)
        } else {
            Tick::Progress(state)
        }
    }

    async fn failed(&mut self, process: &dyn WorkerProcess) -> Tick {
        self.retry_count += 1;

        // Process exit wins over the retry budget.
        if !process.is_alive() {
            warn!("Worker process {} exit was not expected.", process.pid());
            process.terminate().await;
            return Tick::Lost(CompletionCode::UnexpectedExit);
        }

        if self.retry_count > self.policy.retry_limit {
            warn!(
                "Worker process {} appears to be unresponsive after {} attempts. Terminating ....",
                process.pid(),
                self.retry_count
            );
            process.terminate().await;
            return Tick::Lost(CompletionCode::Unresponsive);
        }

        debug!(
            "Poll failed ({}/{})",
            self.retry_count, self.policy.retry_limit
        );
        Tick::Continue
    }
}
