//! Scan and encode sessions driven against a worker.
//!
//! A session moves forward through [`SessionState`] and reports to its owner over
//! an unbounded channel of [`SessionEvent`]s. `Completed` is sent exactly once per
//! session, whatever ends it.

mod encode;
mod poller;
mod remote;
mod scan;

pub use encode::EncodeOrchestrator;
pub use poller::{EmptyBody, PollOutcome, ProgressPoller, Tick};
pub use scan::{ScanOrchestrator, ScanResults};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Config, PollPolicy, UserSettings};
use crate::error::{WorkerError, WorkerResult};
use crate::job::{InitCommand, WorkerMode};
use crate::protocol::{TaskState, WorkerState};

/// Completion code for a session that ended successfully
pub const SUCCESS: i32 = 0;
/// The worker accepted the connection but refused the start request
pub const START_REJECTED: i32 = 4;
/// The control channel never became ready
pub const SERVER_NOT_RUNNING: i32 = -10;
/// The worker stopped answering but is still running
pub const WORKER_UNRESPONSIVE: i32 = -11;
/// The worker exited before results were ready
pub const WORKER_EXITED: i32 = -12;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Success,
    StartRejected,
    ServerNotRunning,
    Unresponsive,
    UnexpectedExit,
    /// Error code reported by the worker's codec
    Worker(i32),
}

impl CompletionCode {
    pub fn from_worker(error: i32) -> Self {
        match error {
            SUCCESS => CompletionCode::Success,
            other => CompletionCode::Worker(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            CompletionCode::Success => SUCCESS,
            CompletionCode::StartRejected => START_REJECTED,
            CompletionCode::ServerNotRunning => SERVER_NOT_RUNNING,
            CompletionCode::Unresponsive => WORKER_UNRESPONSIVE,
            CompletionCode::UnexpectedExit => WORKER_EXITED,
            CompletionCode::Worker(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == CompletionCode::Success
    }

    /// `Ok` for success, otherwise the error describing how the session ended
    pub fn into_result(self) -> WorkerResult<()> {
        match self {
            CompletionCode::Success => Ok(()),
            CompletionCode::StartRejected => Err(WorkerError::StartRejected),
            CompletionCode::ServerNotRunning => Err(WorkerError::ReadinessTimeout),
            CompletionCode::Unresponsive => Err(WorkerError::Unresponsive),
            CompletionCode::UnexpectedExit => Err(WorkerError::UnexpectedExit),
            CompletionCode::Worker(code) => Err(WorkerError::WorkerFailed(code)),
        }
    }
}

/// The kind of work a running session is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningPhase {
    Scanning,
    Searching,
    Encoding,
    Paused,
}

impl RunningPhase {
    fn from_task_state(state: TaskState) -> Option<Self> {
        match state {
            TaskState::Scanning => Some(RunningPhase::Scanning),
            TaskState::Searching => Some(RunningPhase::Searching),
            TaskState::Working | TaskState::Muxing => Some(RunningPhase::Encoding),
            TaskState::Paused => Some(RunningPhase::Paused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Initializing,
    Running(RunningPhase),
    /// The worker has finished and results can be fetched
    WorkDone,
    ResultsFetched,
    Failed,
}

impl SessionState {
    fn rank(self) -> u8 {
        match self {
            SessionState::NotStarted => 0,
            SessionState::Initializing => 1,
            SessionState::Running(_) => 2,
            SessionState::WorkDone => 3,
            SessionState::ResultsFetched => 4,
            SessionState::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::WorkDone | SessionState::ResultsFetched | SessionState::Failed
        )
    }

    /// Forward-only transitions; `Failed` is reachable from any non-terminal state
    pub fn can_advance_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::ResultsFetched | SessionState::Failed, _) => false,
            (current, SessionState::Failed) => !current.is_terminal(),
            (SessionState::Running(_), SessionState::Running(_)) => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

/// Scan counters within a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounters {
    pub preview: i32,
    pub preview_count: i32,
    pub title: i32,
    pub title_count: i32,
}

/// Encode pass counters within a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassCounters {
    pub pass: i32,
    pub pass_count: i32,
    pub pass_id: i32,
}

/// Point-in-time progress of a running session
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub phase: RunningPhase,
    /// 0.0 to 1.0
    pub fraction_complete: f64,
    pub current_rate: Option<f64>,
    pub average_rate: Option<f64>,
    pub estimated_time_left: Option<Duration>,
    pub scan: Option<ScanCounters>,
    pub pass: Option<PassCounters>,
}

impl ProgressSnapshot {
    pub fn from_scan_state(state: &WorkerState) -> Option<Self> {
        let phase = RunningPhase::from_task_state(state.state)?;
        let scanning = state.scanning.clone().unwrap_or_default();
        Some(Self {
            phase,
            fraction_complete: scanning.progress,
            current_rate: None,
            average_rate: None,
            estimated_time_left: None,
            scan: Some(ScanCounters {
                preview: scanning.preview,
                preview_count: scanning.preview_count,
                title: scanning.title,
                title_count: scanning.title_count,
            }),
            pass: None,
        })
    }

    pub fn from_encode_state(state: &WorkerState) -> Option<Self> {
        let phase = RunningPhase::from_task_state(state.state)?;
        let working = state.working.clone().unwrap_or_default();
        Some(Self {
            phase,
            fraction_complete: working.progress,
            current_rate: Some(working.rate),
            average_rate: Some(working.rate_avg),
            estimated_time_left: u64::try_from(working.eta_seconds)
                .ok()
                .map(Duration::from_secs),
            scan: None,
            pass: Some(PassCounters {
                pass: working.pass,
                pass_count: working.pass_count,
                pass_id: working.pass_id,
            }),
        })
    }
}

/// Notifications raised by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(ProgressSnapshot),
    Completed(CompletionCode),
}

/// Receiving end of a session's notifications
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Owns the live state of the current session and its outbound events.
///
/// One tracker serves consecutive sessions on the same instance; `begin` resets it
/// once the previous session has completed.
#[derive(Debug)]
pub struct SessionTracker {
    state: Mutex<SessionState>,
    completed: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionTracker {
    pub fn new() -> (Self, SessionEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let tracker = Self {
            state: Mutex::new(SessionState::NotStarted),
            completed: AtomicBool::new(false),
            events,
        };
        (tracker, receiver)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Start a new session; fails while one is still in flight
    pub fn begin(&self) -> bool {
        let mut state = self.state.lock();
        let idle = *state == SessionState::NotStarted || self.completed.load(Ordering::Acquire);
        if !idle {
            return false;
        }
        *state = SessionState::NotStarted;
        self.completed.store(false, Ordering::Release);
        true
    }

    /// Move to `next` if that is a forward transition
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if state.can_advance_to(next) {
            debug!("Session state {:?} -> {:?}", *state, next);
            *state = next;
            true
        } else {
            debug!("Ignoring session transition {:?} -> {:?}", *state, next);
            false
        }
    }

    /// Record a running snapshot and notify
    pub fn progress(&self, snapshot: ProgressSnapshot) {
        if self.advance(SessionState::Running(snapshot.phase)) {
            let _ = self.events.send(SessionEvent::Progress(snapshot));
        }
    }

    /// Raise `Completed`; only the first call per session has any effect
    pub fn complete(&self, code: CompletionCode) -> bool {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Session already completed, dropping {:?}", code);
            return false;
        }

        if !code.is_success() {
            self.advance(SessionState::Failed);
        }
        info!("Session completed with code {}", code.code());
        if self.events.send(SessionEvent::Completed(code)).is_err() {
            warn!("Session completion ({}) had no listener", code.code());
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Settings shared by every remote session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub poll: PollPolicy,
    pub ready_attempts: u32,
    pub ready_timeout: Duration,
    pub init: InitCommand,
}

impl SessionOptions {
    pub fn scan(config: &Config, settings: &UserSettings) -> Self {
        Self {
            poll: config.scan_poll_policy(),
            ready_attempts: config.ready_attempts,
            ready_timeout: config.ready_timeout,
            init: InitCommand::new(WorkerMode::Scan, config, settings),
        }
    }

    pub fn encode(config: &Config, settings: &UserSettings) -> Self {
        Self {
            poll: config.encode_poll_policy(),
            ready_attempts: config.ready_attempts,
            ready_timeout: config.ready_timeout,
            init: InitCommand::new(WorkerMode::Encode, config, settings),
        }
    }
}
