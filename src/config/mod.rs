use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};
use crate::worker::ProcessPriority;

/// Configuration for worker launch and session polling
#[derive(Debug, Clone)]
pub struct Config {
    pub worker_path: PathBuf,
    pub worker_port: u16,
    pub process_priority: ProcessPriority,
    pub process_isolation: bool,
    pub scan_poll_interval: Duration,
    pub encode_poll_interval: Duration,
    pub poll_retry_limit: u32,
    pub ready_attempts: u32,
    pub ready_timeout: Duration,
    pub request_timeout: Duration,
    pub init_timeout: Duration,
    pub simultaneous_encodes: u32,
    pub verbosity: u8,
    pub settings_path: PathBuf,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_path: env::var("WORKER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.worker_path),
            worker_port: env_or("WORKER_PORT", defaults.worker_port),
            process_priority: env_or("WORKER_PRIORITY", defaults.process_priority),
            process_isolation: env_or("PROCESS_ISOLATION", defaults.process_isolation),
            scan_poll_interval: Duration::from_millis(env_or("SCAN_POLL_MS", 250)),
            encode_poll_interval: Duration::from_millis(env_or("ENCODE_POLL_MS", 500)),
            poll_retry_limit: env_or("POLL_RETRY_LIMIT", defaults.poll_retry_limit),
            ready_attempts: env_or("READY_ATTEMPTS", defaults.ready_attempts),
            ready_timeout: Duration::from_millis(env_or("READY_TIMEOUT_MS", 2000)),
            request_timeout: defaults.request_timeout,
            init_timeout: Duration::from_secs(env_or("INIT_TIMEOUT_SECS", 8)),
            simultaneous_encodes: env_or("SIMULTANEOUS_ENCODES", defaults.simultaneous_encodes),
            verbosity: env_or("LOG_VERBOSITY", defaults.verbosity),
            settings_path: env::var("SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
        }
    }

    /// Polling behaviour for scan sessions
    pub fn scan_poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.scan_poll_interval,
            retry_limit: self.poll_retry_limit,
        }
    }

    /// Polling behaviour for encode sessions
    pub fn encode_poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.encode_poll_interval,
            retry_limit: self.poll_retry_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_path: PathBuf::from("media-worker"),
            worker_port: 8037,
            process_priority: ProcessPriority::Default,
            process_isolation: true,
            scan_poll_interval: Duration::from_millis(250),
            encode_poll_interval: Duration::from_millis(500),
            poll_retry_limit: 5,
            ready_attempts: 10,
            ready_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            init_timeout: Duration::from_secs(8),
            simultaneous_encodes: 1,
            verbosity: 1,
            settings_path: PathBuf::from("media-isolation.settings.json"),
        }
    }
}

/// Poll loop timing and failure threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Consecutive failures tolerated before the worker is declared lost
    pub retry_limit: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            retry_limit: 5,
        }
    }
}

/// Settings the host persists between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub hardware_acceleration_disabled: bool,
    pub disable_dvd_nav: bool,
    pub excluded_extensions: Vec<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            hardware_acceleration_disabled: false,
            disable_dvd_nav: false,
            excluded_extensions: vec!["srt".to_string(), "jpg".to_string(), "png".to_string()],
        }
    }
}

/// Access to the host's persisted settings
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> UserSettings;
    fn save(&self, settings: &UserSettings) -> WorkerResult<()>;

    /// Permanently turn off hardware acceleration
    fn disable_hardware_acceleration(&self) -> WorkerResult<()> {
        let mut settings = self.load();
        settings.hardware_acceleration_disabled = true;
        self.save(&settings)
    }
}

/// Settings stored as a JSON document on disk
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> UserSettings {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                info!("Ignoring unreadable settings file {:?}: {}", self.path, e);
                UserSettings::default()
            }),
            Err(_) => {
                debug!("No settings file at {:?}, using defaults", self.path);
                UserSettings::default()
            }
        }
    }

    fn save(&self, settings: &UserSettings) -> WorkerResult<()> {
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| WorkerError::Settings(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Settings held only in memory
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<UserSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: UserSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> UserSettings {
        self.settings.lock().clone()
    }

    fn save(&self, settings: &UserSettings) -> WorkerResult<()> {
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}
