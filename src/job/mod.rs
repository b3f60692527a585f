use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, UserSettings};

/// Describes a scan of one or more sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub paths: Vec<PathBuf>,
    pub preview_count: u32,
    pub min_duration: Duration,
    /// 0 scans every title
    pub title_index: u32,
    pub hw_decode: i32,
    pub keep_duplicate_titles: bool,
}

impl ScanJob {
    /// Scan every title of a single source with the usual defaults
    pub fn new(path: PathBuf) -> Self {
        Self {
            paths: vec![path],
            preview_count: 10,
            min_duration: Duration::from_secs(10),
            title_index: 0,
            hw_decode: 0,
            keep_duplicate_titles: false,
        }
    }
}

/// Describes one encode; `document` is the codec job built by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub document: serde_json::Value,
}

impl EncodeJob {
    pub fn new(source: PathBuf, destination: PathBuf, document: serde_json::Value) -> Self {
        Self {
            source,
            destination,
            document,
        }
    }

    /// Build from a codec job document, reading `Source.Path` and `Destination.File`
    pub fn from_document(document: serde_json::Value) -> Option<Self> {
        let source = document.pointer("/Source/Path")?.as_str()?.into();
        let destination = document.pointer("/Destination/File")?.as_str()?.into();
        Some(Self::new(source, destination, document))
    }
}

/// Worker mode carried in the init command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    Encode = 1,
    Scan = 2,
}

/// Worker-side initialisation sent ahead of every session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitCommand {
    pub enable_disk_logging: bool,
    pub allow_disconnected_worker: bool,
    pub enable_lib_dvd_nav: bool,
    pub enable_hardware_acceleration: bool,
    pub log_verbosity: u8,
    pub mode: u8,
    #[serde(rename = "ExcludeExtnesionList")]
    pub exclude_extension_list: Vec<String>,
    pub hw_decode: i32,
    pub keep_duplicate_titles: bool,
}

impl InitCommand {
    pub fn new(mode: WorkerMode, config: &Config, settings: &UserSettings) -> Self {
        Self {
            enable_disk_logging: false,
            allow_disconnected_worker: false,
            enable_lib_dvd_nav: !settings.disable_dvd_nav,
            enable_hardware_acceleration: !settings.hardware_acceleration_disabled,
            log_verbosity: config.verbosity,
            mode: mode as u8,
            exclude_extension_list: settings.excluded_extensions.clone(),
            hw_decode: 0,
            keep_duplicate_titles: false,
        }
    }
}

/// Body of `StartScan`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanRequest {
    pub initialise_command: InitCommand,
    pub paths: Vec<String>,
    #[serde(with = "timespan")]
    pub min_duration: Duration,
    pub preview_count: u32,
    pub title_index: u32,
}

impl ScanRequest {
    pub fn new(mut init: InitCommand, job: &ScanJob) -> Self {
        init.hw_decode = job.hw_decode;
        init.keep_duplicate_titles = job.keep_duplicate_titles;
        Self {
            initialise_command: init,
            paths: job
                .paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            min_duration: job.min_duration,
            preview_count: job.preview_count,
            title_index: job.title_index,
        }
    }
}

/// Body of `StartEncode`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncodeRequest<'a> {
    pub initialise_command: InitCommand,
    pub encode_job: &'a serde_json::Value,
}

/// Body of `GetPreview`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreviewRequest<'a> {
    pub encode_settings: &'a serde_json::Value,
    pub preview_number: u32,
}

/// `HH:MM:SS` durations as the worker expects them
mod timespan {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let total = duration.as_secs();
        let text = format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60);
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut seconds = 0u64;
        for part in text.split(':') {
            let value: u64 = part
                .split('.')
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(serde::de::Error::custom)?;
            seconds = seconds * 60 + value;
        }
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_request_wire_format() {
        let mut job = ScanJob::new(PathBuf::from("/media/movie.mkv"));
        job.min_duration = Duration::from_secs(3725);
        job.keep_duplicate_titles = true;
        job.hw_decode = 4;

        let init = InitCommand::new(WorkerMode::Scan, &Config::default(), &UserSettings::default());
        let body = serde_json::to_value(ScanRequest::new(init, &job)).unwrap();

        assert_eq!(body["Paths"], json!(["/media/movie.mkv"]));
        assert_eq!(body["MinDuration"], json!("01:02:05"));
        assert_eq!(body["PreviewCount"], json!(10));
        assert_eq!(body["InitialiseCommand"]["Mode"], json!(2));
        assert_eq!(body["InitialiseCommand"]["KeepDuplicateTitles"], json!(true));
        assert_eq!(body["InitialiseCommand"]["HwDecode"], json!(4));
        assert_eq!(
            body["InitialiseCommand"]["ExcludeExtnesionList"],
            json!(["srt", "jpg", "png"])
        );
        assert!(body["InitialiseCommand"].get("ExcludeExtensionList").is_none());
    }

    #[test]
    fn test_scan_request_parses_back() {
        let job = ScanJob::new(PathBuf::from("/media/a.mkv"));
        let init = InitCommand::new(WorkerMode::Scan, &Config::default(), &UserSettings::default());
        let text = serde_json::to_string(&ScanRequest::new(init, &job)).unwrap();

        let parsed: ScanRequest = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.min_duration, Duration::from_secs(10));
    }

    #[test]
    fn test_init_command_respects_hardware_downgrade() {
        let settings = UserSettings {
            hardware_acceleration_disabled: true,
            ..UserSettings::default()
        };
        let init = InitCommand::new(WorkerMode::Encode, &Config::default(), &settings);
        assert!(!init.enable_hardware_acceleration);
        assert_eq!(init.mode, 1);
    }

    #[test]
    fn test_encode_job_from_document() {
        let document = json!({
            "Source": {"Path": "/in/movie.mkv", "Title": 1},
            "Destination": {"File": "/out/movie.mp4"}
        });
        let job = EncodeJob::from_document(document).unwrap();
        assert_eq!(job.source, PathBuf::from("/in/movie.mkv"));
        assert_eq!(job.destination, PathBuf::from("/out/movie.mp4"));

        assert!(EncodeJob::from_document(json!({"Source": {}})).is_none());
    }
}
