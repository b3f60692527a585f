//! A scripted worker for driving sessions without the real executable.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::Router;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use media_isolation::config::{Config, UserSettings};
use media_isolation::rpc::RpcClient;
use media_isolation::session::{CompletionCode, SessionEvent, SessionEvents, SessionOptions};
use media_isolation::worker::WorkerProcess;

pub const TOKEN: &str = "dGVzdC10b2tlbg==";

pub const TITLES: &str = r#"{"MainFeature": 1, "TitleList": [
    {"Index": 1, "Path": "/media/movie.mkv", "Name": "Feature", "Duration": {"Hours": 1, "Minutes": 40, "Seconds": 0}},
    {"Index": 2, "Path": "/media/movie.mkv", "Name": "Extras", "Duration": {"Hours": 0, "Minutes": 3, "Seconds": 12}}
]}"#;

pub const PREVIEW: &str = r#"{"Width": 2, "Height": 1, "Stride": 8, "RawBitmapData": "AAECAwQFBgc="}"#;

pub fn scanning(progress: f64) -> String {
    format!(
        r#"{{"State": "SCANNING", "Scanning": {{"Progress": {progress}, "Preview": 1, "PreviewCount": 10, "Title": 1, "TitleCount": 2}}}}"#
    )
}

pub fn working(progress: f64) -> String {
    format!(
        r#"{{"State": "WORKING", "Working": {{"Progress": {progress}, "Rate": 30.0, "RateAvg": 29.5, "ETASeconds": 12, "Pass": 1, "PassCount": 1, "PassID": -1}}}}"#
    )
}

pub fn work_done(error: i32) -> String {
    format!(r#"{{"State": "WORKDONE", "WorkDone": {{"Error": {error}}}}}"#)
}

/// One scripted reply to a poll
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct MockWorker {
    ready: AtomicBool,
    start_status: Mutex<StatusCode>,
    polls: Mutex<VecDeque<Reply>>,
    last_poll: Mutex<Reply>,
    finish_on_stop: Mutex<Option<Reply>>,
    hits: Mutex<HashMap<String, usize>>,
    bodies: Mutex<HashMap<String, String>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl MockWorker {
    pub fn new(polls: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            start_status: Mutex::new(StatusCode::OK),
            polls: Mutex::new(polls.into()),
            last_poll: Mutex::new(Reply::error()),
            finish_on_stop: Mutex::new(None),
            hits: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
            tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn reject_start(&self) {
        *self.start_status.lock() = StatusCode::FORBIDDEN;
    }

    /// Queue more poll replies behind any still pending
    pub fn script(&self, polls: Vec<Reply>) {
        self.polls.lock().extend(polls);
    }

    /// Once a stop request arrives, answer every later poll with `reply`
    pub fn finish_on_stop(&self, reply: Reply) {
        *self.finish_on_stop.lock() = Some(reply);
    }

    fn stopped(&self) {
        if let Some(reply) = self.finish_on_stop.lock().take() {
            self.polls.lock().clear();
            *self.last_poll.lock() = reply;
        }
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.hits.lock().get(endpoint).copied().unwrap_or(0)
    }

    pub fn body(&self, endpoint: &str) -> Option<String> {
        self.bodies.lock().get(endpoint).cloned()
    }

    /// Every token header seen, in order
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().clone()
    }

    fn next_poll(&self) -> Reply {
        let mut polls = self.polls.lock();
        match polls.pop_front() {
            Some(reply) => {
                *self.last_poll.lock() = reply.clone();
                reply
            }
            // Once the script runs out, the last reply repeats.
            None => self.last_poll.lock().clone(),
        }
    }

    /// Serve on an ephemeral loopback port and return the base URL
    pub async fn serve(self: &Arc<Self>) -> String {
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(self));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }
}

async fn handle(
    State(worker): State<Arc<MockWorker>>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let endpoint = uri.path().trim_start_matches('/').to_string();
    *worker.hits.lock().entry(endpoint.clone()).or_default() += 1;
    worker.tokens.lock().push(
        headers
            .get("token")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    );
    if !body.is_empty() {
        worker.bodies.lock().insert(endpoint.clone(), body);
    }

    match endpoint.as_str() {
        "IsTokenSet" => {
            let ready = worker.ready.load(Ordering::SeqCst);
            (StatusCode::OK, ready.to_string())
        }
        "Version" => (StatusCode::OK, "1.9.2".to_string()),
        "StartScan" | "StartEncode" => (*worker.start_status.lock(), String::new()),
        "PollScanProgress" | "PollEncodeProgress" => {
            let reply = worker.next_poll();
            (reply.status, reply.body)
        }
        "GetTitles" => (StatusCode::OK, TITLES.to_string()),
        "GetMainTitle" => (StatusCode::OK, "1".to_string()),
        "GetPreview" => (StatusCode::OK, PREVIEW.to_string()),
        "StopScan" | "StopEncode" => {
            worker.stopped();
            (StatusCode::OK, String::new())
        }
        _ => (StatusCode::OK, String::new()),
    }
}

/// A worker process that exists only as flags
#[derive(Debug)]
pub struct FakeProcess {
    alive: AtomicBool,
    terminations: AtomicUsize,
}

impl FakeProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: AtomicBool::new(true),
            terminations: AtomicUsize::new(0),
        })
    }

    /// Simulate the process dying on its own
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> u32 {
        4242
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

pub fn test_config() -> Config {
    Config {
        scan_poll_interval: Duration::from_millis(20),
        encode_poll_interval: Duration::from_millis(20),
        ready_timeout: Duration::from_millis(100),
        request_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

pub fn scan_options() -> SessionOptions {
    SessionOptions::scan(&test_config(), &UserSettings::default())
}

pub fn encode_options() -> SessionOptions {
    SessionOptions::encode(&test_config(), &UserSettings::default())
}

pub fn client(base_url: &str) -> RpcClient {
    RpcClient::with_base_url(base_url, TOKEN, Duration::from_secs(2))
}

/// Collect events until `Completed`, returning the progress seen on the way
pub async fn until_completed(events: &mut SessionEvents) -> (Vec<SessionEvent>, CompletionCode) {
    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("session did not complete in time")
            .expect("event channel closed before completion");
        match event {
            SessionEvent::Completed(code) => return (progress, code),
            other => progress.push(other),
        }
    }
}
