//! Chooses where scans and encodes run.
//!
//! With process isolation on, every acquisition launches its own worker. With it
//! off, work runs on one shared in-process codec instance, which is replaced on
//! every acquisition and guarded by a single lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::codec::{CodecInstance, CodecLibrary};
use crate::config::{Config, SettingsStore};
use crate::error::{WorkerError, WorkerResult};
use crate::job::{EncodeJob, ScanJob};
use crate::port::PortAllocator;
use crate::rpc::RpcClient;
use crate::session::{
    EncodeOrchestrator, ScanOrchestrator, ScanResults, SessionEvents, SessionOptions,
    SessionState, SessionTracker,
};
use crate::worker::{WorkerProcess, WorkerProcessSupervisor};

/// The shared in-process codec instance
pub struct LocalInstance {
    codec: Box<dyn CodecInstance>,
    disposed: AtomicBool,
}

impl LocalInstance {
    fn new(codec: Box<dyn CodecInstance>) -> Self {
        Self {
            codec,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release the codec instance. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Disposing shared in-process instance");
        self.codec.dispose();
    }

    fn ensure_live(&self) -> WorkerResult<()> {
        if self.is_disposed() {
            return Err(WorkerError::CodecUnavailable(
                "the shared instance was replaced by a later acquisition".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalInstance")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A caller's session on the shared in-process instance
#[derive(Debug)]
pub struct LocalSession {
    instance: Arc<LocalInstance>,
    tracker: Arc<SessionTracker>,
}

impl LocalSession {
    fn new(instance: Arc<LocalInstance>) -> (Self, SessionEvents) {
        let (tracker, events) = SessionTracker::new();
        let session = Self {
            instance,
            tracker: Arc::new(tracker),
        };
        (session, events)
    }

    fn begin(&self) -> WorkerResult<()> {
        self.instance.ensure_live()?;
        if !self.tracker.begin() {
            return Err(WorkerError::SessionActive);
        }
        Ok(())
    }
}

/// A scan-capable instance
#[derive(Debug)]
pub enum ScanInstance {
    Local(LocalSession),
    Remote(ScanOrchestrator),
}

impl ScanInstance {
    pub async fn start(&self, job: &ScanJob) -> WorkerResult<()> {
        match self {
            ScanInstance::Local(local) => {
                local.begin()?;
                local
                    .instance
                    .codec
                    .start_scan(job, Arc::clone(&local.tracker))
            }
            ScanInstance::Remote(remote) => remote.start(job).await,
        }
    }

    pub async fn stop(&self) {
        match self {
            ScanInstance::Local(local) => {
                if !local.instance.is_disposed() {
                    local.instance.codec.stop_scan();
                }
            }
            ScanInstance::Remote(remote) => remote.stop().await,
        }
    }

    pub fn results(&self) -> Option<ScanResults> {
        match self {
            ScanInstance::Local(local) => local.instance.codec.scan_results(),
            ScanInstance::Remote(remote) => remote.results(),
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            ScanInstance::Local(local) => local.tracker.state(),
            ScanInstance::Remote(remote) => remote.state(),
        }
    }

    /// Worker version; the in-process codec has none to report
    pub async fn version(&self) -> Option<String> {
        match self {
            ScanInstance::Local(_) => None,
            ScanInstance::Remote(remote) => remote.version().await,
        }
    }

    pub async fn dispose(&self) {
        match self {
            ScanInstance::Local(local) => local.instance.dispose(),
            ScanInstance::Remote(remote) => remote.dispose().await,
        }
    }
}

/// An encode-capable instance
#[derive(Debug)]
pub enum EncodeInstance {
    Local(LocalSession),
    Remote(EncodeOrchestrator),
}

impl EncodeInstance {
    pub async fn start(&self, job: &EncodeJob) -> WorkerResult<()> {
        match self {
            EncodeInstance::Local(local) => {
                local.begin()?;
                local
                    .instance
                    .codec
                    .start_encode(job, Arc::clone(&local.tracker))
            }
            EncodeInstance::Remote(remote) => remote.start(job).await,
        }
    }

    pub async fn stop(&self) {
        match self {
            EncodeInstance::Local(local) => {
                if !local.instance.is_disposed() {
                    local.instance.codec.stop_encode();
                }
            }
            EncodeInstance::Remote(remote) => remote.stop().await,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            EncodeInstance::Local(local) => local.tracker.state(),
            EncodeInstance::Remote(remote) => remote.state(),
        }
    }

    pub async fn dispose(&self) {
        match self {
            EncodeInstance::Local(local) => local.instance.dispose(),
            EncodeInstance::Remote(remote) => remote.dispose().await,
        }
    }
}

/// Owns global codec initialisation and hands out scan and encode instances
pub struct InstanceManager {
    config: Config,
    settings: Arc<dyn SettingsStore>,
    supervisor: WorkerProcessSupervisor,
    codec: Arc<dyn CodecLibrary>,
    process_isolation: AtomicBool,
    /// Set once global init succeeds; holds whether hardware was disabled
    no_hardware: OnceCell<bool>,
    shared: Mutex<Option<Arc<LocalInstance>>>,
}

impl InstanceManager {
    pub fn new(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        codec: Arc<dyn CodecLibrary>,
    ) -> Self {
        let supervisor = WorkerProcessSupervisor::from_config(&config, PortAllocator::new());
        Self {
            process_isolation: AtomicBool::new(config.process_isolation),
            config,
            settings,
            supervisor,
            codec,
            no_hardware: OnceCell::new(),
            shared: Mutex::new(None),
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.no_hardware.initialized()
    }

    pub fn process_isolation(&self) -> bool {
        self.process_isolation.load(Ordering::Acquire)
    }

    /// Takes effect from the next acquisition
    pub fn set_process_isolation(&self, enabled: bool) {
        self.process_isolation.store(enabled, Ordering::Release);
    }

    /// Initialise the codec library once, giving up after the configured deadline.
    ///
    /// A timeout usually means a GPU driver hung during probing, so hardware
    /// acceleration is switched off in the persisted settings before returning.
    /// Concurrent callers share a single attempt; a failed attempt can be retried.
    pub async fn init(&self, no_hardware: bool) -> WorkerResult<()> {
        self.no_hardware
            .get_or_try_init(|| self.global_init(no_hardware))
            .await?;
        Ok(())
    }

    async fn global_init(&self, no_hardware: bool) -> WorkerResult<bool> {
        let no_hardware = no_hardware || self.settings.load().hardware_acceleration_disabled;
        let codec = Arc::clone(&self.codec);
        let deadline = self.config.init_timeout;

        let task = tokio::task::spawn_blocking(move || codec.global_init(no_hardware));
        match tokio::time::timeout(deadline, task).await {
            Err(_) => {
                warn!(
                    "Codec initialisation did not finish within {:?}. Disabling hardware acceleration.",
                    deadline
                );
                self.settings.disable_hardware_acceleration()?;
                Err(WorkerError::InitializationTimeout(deadline))
            }
            Ok(Err(join_error)) => Err(WorkerError::InitializationFailed(join_error.to_string())),
            Ok(Ok(Err(message))) => Err(WorkerError::InitializationFailed(message)),
            Ok(Ok(Ok(()))) => {
                info!("Codec library initialised (hardware disabled: {})", no_hardware);
                Ok(no_hardware)
            }
        }
    }

    pub async fn acquire_scan(&self) -> WorkerResult<(ScanInstance, SessionEvents)> {
        self.ensure_initialised()?;
        let mut shared = self.shared.lock().await;
        dispose_shared(&mut shared);

        if self.process_isolation() {
            let (rpc, process) = self.launch_worker()?;
            let options = SessionOptions::scan(&self.config, &self.settings.load());
            let (orchestrator, events) = ScanOrchestrator::new(rpc, process, options);
            return Ok((ScanInstance::Remote(orchestrator), events));
        }

        let instance = self.create_local()?;
        *shared = Some(Arc::clone(&instance));
        let (session, events) = LocalSession::new(instance);
        Ok((ScanInstance::Local(session), events))
    }

    pub async fn acquire_encode(&self) -> WorkerResult<(EncodeInstance, SessionEvents)> {
        self.ensure_initialised()?;
        let mut shared = self.shared.lock().await;
        dispose_shared(&mut shared);

        if self.process_isolation() {
            let (rpc, process) = self.launch_worker()?;
            let options = SessionOptions::encode(&self.config, &self.settings.load());
            let (orchestrator, events) = EncodeOrchestrator::new(rpc, process, options);
            return Ok((EncodeInstance::Remote(orchestrator), events));
        }

        let instance = self.create_local()?;
        *shared = Some(Arc::clone(&instance));
        let (session, events) = LocalSession::new(instance);
        Ok((EncodeInstance::Local(session), events))
    }

    /// Dispose the shared in-process instance, if any
    pub async fn release(&self) {
        let mut shared = self.shared.lock().await;
        dispose_shared(&mut shared);
    }

    fn ensure_initialised(&self) -> WorkerResult<()> {
        if !self.is_initialised() {
            return Err(WorkerError::NotInitialized);
        }
        Ok(())
    }

    fn launch_worker(&self) -> WorkerResult<(RpcClient, Arc<dyn WorkerProcess>)> {
        let handle = self
            .supervisor
            .launch(self.config.worker_port, self.config.process_priority)?;
        let rpc = RpcClient::new(handle.port(), handle.token(), self.config.request_timeout);
        let process: Arc<dyn WorkerProcess> = Arc::new(handle);
        Ok((rpc, process))
    }

    fn create_local(&self) -> WorkerResult<Arc<LocalInstance>> {
        let no_hardware = self.no_hardware.get().copied().unwrap_or_default();
        let codec = self.codec.create_instance(self.config.verbosity, no_hardware)?;
        Ok(Arc::new(LocalInstance::new(codec)))
    }
}

fn dispose_shared(shared: &mut Option<Arc<LocalInstance>>) {
    if let Some(previous) = shared.take() {
        previous.dispose();
    }
}
