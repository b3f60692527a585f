//! Launching and supervising the isolated worker process.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{WorkerError, WorkerResult};
use crate::port::{PortAllocator, PortReservation};

/// How long `terminate` waits for the OS to confirm the kill
const TERMINATE_WAIT: Duration = Duration::from_secs(5);

/// Scheduling priority applied to a worker after launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessPriority {
    Highest,
    High,
    AboveNormal,
    Normal,
    Low,
    #[default]
    Default,
}

impl ProcessPriority {
    /// Unix niceness for this priority. `Default` runs the worker below normal.
    pub fn niceness(self) -> i32 {
        match self {
            ProcessPriority::Highest => -10,
            ProcessPriority::High => -5,
            ProcessPriority::AboveNormal => -2,
            ProcessPriority::Normal => 0,
            ProcessPriority::Low => 19,
            ProcessPriority::Default => 10,
        }
    }
}

impl FromStr for ProcessPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "highest" => Ok(ProcessPriority::Highest),
            "high" => Ok(ProcessPriority::High),
            "abovenormal" => Ok(ProcessPriority::AboveNormal),
            "normal" => Ok(ProcessPriority::Normal),
            "low" => Ok(ProcessPriority::Low),
            "default" => Ok(ProcessPriority::Default),
            other => Err(format!("unknown process priority: {other}")),
        }
    }
}

/// What orchestrators need to know about a running worker
#[async_trait]
pub trait WorkerProcess: Send + Sync + fmt::Debug {
    fn pid(&self) -> u32;

    fn is_alive(&self) -> bool;

    /// Force-kill the worker. Idempotent, and a no-op once it has exited.
    async fn terminate(&self);
}

/// Lifetime of a launched worker as seen by its monitor task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exit code, `None` when killed by a signal or the status was lost
    Exited(Option<i32>),
}

/// Random per-launch credential shared with the worker
pub fn generate_token() -> String {
    STANDARD.encode(Uuid::new_v4().to_string())
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

/// Starts worker processes and hands back handles that own them
#[derive(Debug, Clone)]
pub struct WorkerProcessSupervisor {
    executable: PathBuf,
    allocator: PortAllocator,
    max_instances: u32,
}

impl WorkerProcessSupervisor {
    pub fn new(executable: PathBuf, allocator: PortAllocator) -> Self {
        Self {
            executable,
            allocator,
            max_instances: 1,
        }
    }

    pub fn from_config(config: &Config, allocator: PortAllocator) -> Self {
        Self {
            executable: config.worker_path.clone(),
            allocator,
            max_instances: config.simultaneous_encodes,
        }
    }

    /// Start a worker on a free port near `port_hint`.
    ///
    /// Must be called from within a tokio runtime; output relays and the exit
    /// monitor run as tasks on it.
    pub fn launch(&self, port_hint: u16, priority: ProcessPriority) -> WorkerResult<WorkerProcessHandle> {
        let reservation = self.allocator.allocate(port_hint)?;
        let port = reservation.port();
        let token = generate_token();

        let mut cmd = Command::new(&self.executable);
        cmd.arg(format!("--port={port}"))
            .arg(format!("--token={token}"))
            .arg(format!("--pid={}", std::process::id()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Launching worker: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| {
            warn!("[{}] Unable to start worker process.", timestamp());
            warn!("[{}] {}", timestamp(), source);
            WorkerError::ProcessLaunchFailure {
                path: self.executable.display().to_string(),
                source,
            }
        })?;

        let pid = child.id().unwrap_or_default();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_output(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_output(stderr));
        }

        if let Err(e) = apply_priority(pid, priority) {
            warn!("Unable to set worker priority to {:?}: {}", priority, e);
        }

        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor(child, pid, kill_rx, exit_tx));

        info!(
            "[{}] Remote process started with process ID: {} using port: {}. Max allowed instances: {}",
            timestamp(),
            pid,
            port,
            self.max_instances
        );

        Ok(WorkerProcessHandle {
            pid,
            port,
            token,
            launched_at: Local::now(),
            reservation: Mutex::new(Some(reservation)),
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
        })
    }
}

/// A launched worker. Dropping the handle kills the process.
pub struct WorkerProcessHandle {
    pid: u32,
    port: u16,
    token: String,
    launched_at: DateTime<Local>,
    reservation: Mutex<Option<PortReservation>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<ExitState>,
}

impl WorkerProcessHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn launched_at(&self) -> DateTime<Local> {
        self.launched_at
    }

    pub fn exit_state(&self) -> ExitState {
        *self.exit_rx.borrow()
    }

    /// Resolves once the process has exited, by itself or by `terminate`
    pub async fn wait_for_exit(&self) -> ExitState {
        let mut rx = self.exit_rx.clone();
        let state = match rx.wait_for(|state| *state != ExitState::Running).await {
            Ok(state) => *state,
            // Monitor gone without reporting; the child was dropped with it.
            Err(_) => ExitState::Exited(None),
        };
        state
    }
}

impl fmt::Debug for WorkerProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcessHandle")
            .field("pid", &self.pid)
            .field("port", &self.port)
            .field("launched_at", &self.launched_at)
            .field("exit_state", &self.exit_state())
            .finish()
    }
}

#[async_trait]
impl WorkerProcess for WorkerProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.exit_state() == ExitState::Running
    }

    async fn terminate(&self) {
        if let Some(kill_tx) = self.kill_tx.lock().take() {
            // Err means the monitor already saw the exit.
            let _ = kill_tx.send(());
        }

        if tokio::time::timeout(TERMINATE_WAIT, self.wait_for_exit())
            .await
            .is_err()
        {
            warn!("Worker process {} did not confirm exit within {:?}", self.pid, TERMINATE_WAIT);
        }

        self.reservation.lock().take();
    }
}

async fn relay_output<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "worker", "[{}] {}", timestamp(), line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading worker output: {}", e);
                break;
            }
        }
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
) {
    let status = tokio::select! {
        status = child.wait() => {
            if let Ok(status) = &status {
                warn!("[{}] Worker process exited! (pid {}, {})", timestamp(), pid, status);
            }
            status
        }
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!("Kill of worker {} failed: {}", pid, e);
            }
            let status = child.wait().await;
            info!("[{}] Worker process {} terminated", timestamp(), pid);
            status
        }
    };

    let state = match status {
        Ok(status) => ExitState::Exited(status.code()),
        Err(e) => {
            warn!("Lost track of worker process {}: {}", pid, e);
            ExitState::Exited(None)
        }
    };
    let _ = exit_tx.send(state);
}

#[cfg(unix)]
fn apply_priority(pid: u32, priority: ProcessPriority) -> std::io::Result<()> {
    if priority == ProcessPriority::Normal || pid == 0 {
        return Ok(());
    }
    // SAFETY: setpriority only reads its scalar arguments.
    let result = unsafe {
        libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, priority.niceness())
    };
    if result == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_priority(_pid: u32, priority: ProcessPriority) -> std::io::Result<()> {
    debug!("Process priority {:?} is not applied on this platform", priority);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parsing() {
        assert_eq!("Above-Normal".parse::<ProcessPriority>().unwrap(), ProcessPriority::AboveNormal);
        assert_eq!("low".parse::<ProcessPriority>().unwrap(), ProcessPriority::Low);
        assert!("realtime".parse::<ProcessPriority>().is_err());
    }

    #[test]
    fn test_priority_ordering_of_niceness() {
        let order = [
            ProcessPriority::Highest,
            ProcessPriority::High,
            ProcessPriority::AboveNormal,
            ProcessPriority::Normal,
            ProcessPriority::Default,
            ProcessPriority::Low,
        ];
        assert!(order.windows(2).all(|w| w[0].niceness() < w[1].niceness()));
    }

    #[test]
    fn test_tokens_are_unique_base64() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        let decoded = STANDARD.decode(&a).unwrap();
        assert!(Uuid::parse_str(std::str::from_utf8(&decoded).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let allocator = PortAllocator::new();
        let supervisor = WorkerProcessSupervisor::new(
            PathBuf::from("/nonexistent/media-worker"),
            allocator.clone(),
        );

        let result = supervisor.launch(42100, ProcessPriority::Normal);
        assert!(matches!(result, Err(WorkerError::ProcessLaunchFailure { .. })));
        assert!(!allocator.is_reserved(42100));
    }
}
