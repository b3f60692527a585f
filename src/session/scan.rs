use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::poller::EmptyBody;
use super::remote::RemoteSession;
use super::{CompletionCode, ProgressSnapshot, SessionEvents, SessionOptions, SessionState};
use crate::error::WorkerResult;
use crate::job::{PreviewRequest, ScanJob, ScanRequest};
use crate::protocol::{endpoints, RawPreview, TitleList};
use crate::rpc::RpcClient;
use crate::worker::WorkerProcess;

/// What a finished scan found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResults {
    pub titles: Option<TitleList>,
    /// Index of the detected main feature
    pub main_title: Option<i32>,
}

/// Drives scans on one isolated worker.
///
/// The worker outlives each scan, so the same orchestrator can scan again or
/// render previews of what it found.
#[derive(Debug)]
pub struct ScanOrchestrator {
    remote: RemoteSession,
    results: Arc<Mutex<Option<ScanResults>>>,
}

impl ScanOrchestrator {
    pub fn new(
        rpc: RpcClient,
        process: Arc<dyn WorkerProcess>,
        options: SessionOptions,
    ) -> (Self, SessionEvents) {
        let (remote, events) = RemoteSession::new(rpc, process, options);
        let orchestrator = Self {
            remote,
            results: Arc::new(Mutex::new(None)),
        };
        (orchestrator, events)
    }

    /// Start scanning; progress and completion arrive on the event channel.
    ///
    /// Errors only when a scan is already running on this orchestrator.
    pub async fn start(&self, job: &ScanJob) -> WorkerResult<()> {
        let request = ScanRequest::new(self.remote.options.init.clone(), job);
        let body = serde_json::to_string(&request)?;

        info!("Starting scan of {:?}", job.paths);
        let started = self.remote.open(endpoints::START_SCAN, body).await?;
        self.results.lock().take();
        if !started {
            return Ok(());
        }

        let results = Arc::clone(&self.results);
        self.remote.spawn_poll(
            endpoints::POLL_SCAN_PROGRESS,
            EmptyBody::Skip,
            ProgressSnapshot::from_scan_state,
            move |rpc, _process, _state| async move {
                let fetched = fetch_results(&rpc).await;
                *results.lock() = Some(fetched);
                CompletionCode::Success
            },
        );
        Ok(())
    }

    /// Ask the worker to cancel the scan
    pub async fn stop(&self) {
        self.remote.send_command(endpoints::STOP_SCAN).await;
    }

    /// Results of the last completed scan
    pub fn results(&self) -> Option<ScanResults> {
        self.results.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        self.remote.tracker.state()
    }

    /// Version string reported by the worker, once it is ready
    pub async fn version(&self) -> Option<String> {
        if !self.remote.is_server_running().await {
            return None;
        }
        self.remote.rpc.version().await
    }

    /// Render a preview frame from the scanned source
    pub async fn get_preview(
        &self,
        encode_settings: &serde_json::Value,
        preview_number: u32,
    ) -> Option<RawPreview> {
        if !self.remote.is_server_running().await {
            return None;
        }

        let request = PreviewRequest {
            encode_settings,
            preview_number,
        };
        let body = match serde_json::to_string(&request) {
            Ok(body) => body,
            Err(e) => {
                warn!("Unable to encode preview request: {}", e);
                return None;
            }
        };

        let response = self.remote.rpc.post_json(endpoints::GET_PREVIEW, body).await;
        response.content().and_then(RawPreview::from_json)
    }

    /// Terminate the worker
    pub async fn dispose(&self) {
        self.remote.dispose().await;
    }
}

async fn fetch_results(rpc: &RpcClient) -> ScanResults {
    let response = rpc.get(endpoints::GET_TITLES).await;
    let titles = response
        .content()
        .and_then(|body| match serde_json::from_str::<TitleList>(body) {
            Ok(titles) => Some(titles),
            Err(e) => {
                warn!("Unreadable title list from worker: {}", e);
                None
            }
        });

    let response = rpc.get(endpoints::GET_MAIN_TITLE).await;
    let main_title = response
        .content()
        .and_then(|body| body.trim().parse::<i32>().ok());

    debug!(
        "Scan found {} titles, main title {:?}",
        titles.as_ref().map_or(0, |t| t.title_list.len()),
        main_title
    );
    ScanResults { titles, main_title }
}
