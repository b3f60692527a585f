//! Wire types for the worker's HTTP control channel.
//!
//! All JSON exchanged with the worker uses PascalCase property names.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Endpoint paths, relative to `http://127.0.0.1:{port}/`.
pub mod endpoints {
    pub const VERSION: &str = "Version";
    pub const IS_TOKEN_SET: &str = "IsTokenSet";

    pub const START_SCAN: &str = "StartScan";
    pub const STOP_SCAN: &str = "StopScan";
    pub const POLL_SCAN_PROGRESS: &str = "PollScanProgress";
    pub const GET_TITLES: &str = "GetTitles";
    pub const GET_MAIN_TITLE: &str = "GetMainTitle";
    pub const GET_PREVIEW: &str = "GetPreview";

    pub const START_ENCODE: &str = "StartEncode";
    pub const STOP_ENCODE: &str = "StopEncode";
    pub const PAUSE_ENCODE: &str = "PauseEncode";
    pub const RESUME_ENCODE: &str = "ResumeEncode";
    pub const POLL_ENCODE_PROGRESS: &str = "PollEncodeProgress";
}

/// State codes reported by the worker in `State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Idle,
    Scanning,
    ScanDone,
    Working,
    Paused,
    Searching,
    WorkDone,
    Muxing,
    #[serde(other)]
    Unknown,
}

/// A progress snapshot as returned by the poll endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkerState {
    pub state: TaskState,
    #[serde(default)]
    pub scanning: Option<ScanningState>,
    #[serde(default)]
    pub working: Option<WorkingState>,
    #[serde(default)]
    pub work_done: Option<WorkDoneState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScanningState {
    pub progress: f64,
    pub preview: i32,
    pub preview_count: i32,
    pub title: i32,
    pub title_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkingState {
    pub progress: f64,
    pub rate: f64,
    pub rate_avg: f64,
    #[serde(rename = "ETASeconds")]
    pub eta_seconds: i64,
    pub pass: i32,
    pub pass_count: i32,
    #[serde(rename = "PassID")]
    pub pass_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkDoneState {
    pub error: i32,
}

/// Title list returned by `GetTitles`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TitleList {
    pub main_feature: i32,
    pub title_list: Vec<Title>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Title {
    pub index: i32,
    pub path: String,
    pub name: String,
    pub playlist: i32,
    pub duration: TitleDuration,
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TitleDuration {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl TitleDuration {
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

/// Preview frame returned by `GetPreview`; the bitmap travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPreviewWire {
    width: u32,
    height: u32,
    stride: u32,
    raw_bitmap_data: String,
}

/// A decoded preview frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPreview {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: Vec<u8>,
}

impl RawPreview {
    /// Decode the JSON body of a `GetPreview` response
    pub fn from_json(body: &str) -> Option<Self> {
        let wire: RawPreviewWire = serde_json::from_str(body).ok()?;
        let data = STANDARD.decode(wire.raw_bitmap_data.as_bytes()).ok()?;
        Some(Self {
            width: wire.width,
            height: wire.height,
            stride: wire.stride,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanning_state_deserialization() {
        let json = r#"{
            "State": "SCANNING",
            "Scanning": {"Preview": 3, "PreviewCount": 10, "Progress": 0.25, "SequenceID": 1, "Title": 1, "TitleCount": 4}
        }"#;

        let state: WorkerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.state, TaskState::Scanning);
        let scanning = state.scanning.unwrap();
        assert_eq!(scanning.preview_count, 10);
        assert_eq!(scanning.title_count, 4);
        assert!(state.work_done.is_none());
    }

    #[test]
    fn test_work_done_deserialization() {
        let json = r#"{"State": "WORKDONE", "WorkDone": {"Error": 2}}"#;
        let state: WorkerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.state, TaskState::WorkDone);
        assert_eq!(state.work_done.unwrap().error, 2);
    }

    #[test]
    fn test_unknown_state_is_tolerated() {
        let state: WorkerState = serde_json::from_str(r#"{"State": "REBOOTING"}"#).unwrap();
        assert_eq!(state.state, TaskState::Unknown);
    }

    #[test]
    fn test_working_state_field_names() {
        let json = r#"{"State": "WORKING", "Working": {"Progress": 0.5, "Rate": 30.0, "RateAvg": 28.5, "ETASeconds": 90, "Pass": 1, "PassCount": 2, "PassID": -1}}"#;
        let working = serde_json::from_str::<WorkerState>(json).unwrap().working.unwrap();
        assert_eq!(working.eta_seconds, 90);
        assert_eq!(working.pass_id, -1);
        assert_eq!(working.rate_avg, 28.5);
    }

    #[test]
    fn test_title_list_and_duration() {
        let json = r#"{"MainFeature": 2, "TitleList": [
            {"Index": 1, "Path": "/media/a", "Name": "A", "Duration": {"Hours": 1, "Minutes": 2, "Seconds": 3}},
            {"Index": 2, "Path": "/media/a", "Name": "B", "Geometry": {"Width": 1920, "Height": 1080}}
        ]}"#;
        let titles: TitleList = serde_json::from_str(json).unwrap();
        assert_eq!(titles.main_feature, 2);
        assert_eq!(titles.title_list[0].duration.total_seconds(), 3723);
        assert_eq!(titles.title_list[1].geometry.unwrap().width, 1920);
    }

    #[test]
    fn test_raw_preview_decodes_bitmap() {
        let json = r#"{"Width": 2, "Height": 1, "Stride": 8, "RawBitmapData": "AQIDBA=="}"#;
        let preview = RawPreview::from_json(json).unwrap();
        assert_eq!(preview.data, vec![1, 2, 3, 4]);
        assert_eq!(preview.stride, 8);

        assert!(RawPreview::from_json(r#"{"Width": 1}"#).is_none());
    }
}
