//! The per-recording manifest written next to every finalized file and
//! re-verified by the ingest server.
//!
//! Readers tolerate unknown fields; an unknown major version is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::response::Position;

pub const VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub recording: RecordingMeta,
    pub file: FileMeta,
    pub video: VideoMeta,
    pub timing: TimingMeta,
    pub checksum: ChecksumMeta,
    pub device: DeviceMeta,
    pub quality: QualityMeta,
    pub expected_cameras: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub id: String,
    pub session_id: String,
    pub node_id: String,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size_bytes: u64,
    pub container: String,
    pub codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_mbps: u32,
    pub duration_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingMeta {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sync_ok: bool,
    pub sync_offset_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumMeta {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub hostname: String,
    pub endpoint: String,
    pub software_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMeta {
    pub dropped_frames: u64,
    pub temperature_avg_c: f32,
    pub temperature_max_c: f32,
}

#[derive(Debug)]
pub enum ManifestError {
    Malformed(String),
    UnsupportedVersion(String),
}

impl std::fmt::Display for ManifestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManifestError::Malformed(e) => write!(f, "malformed manifest: {}", e),
            ManifestError::UnsupportedVersion(v) => {
                write!(f, "unsupported manifest version: {}", v)
            }
        }
    }
}

impl std::error::Error for ManifestError {}

impl Manifest {
    pub fn from_json(data: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_json::from_slice(data).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        let major = manifest.version.split('.').next().unwrap_or_default();
        if major != VERSION {
            return Err(ManifestError::UnsupportedVersion(manifest.version));
        }
        Ok(manifest)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("manifest serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Manifest {
        Manifest {
            version: VERSION.to_string(),
            recording: RecordingMeta {
                id: "GAME_20240315_140000_CAM_L".to_string(),
                session_id: "GAME_20240315_140000".to_string(),
                node_id: "CAM_L".to_string(),
                position: Position::Left,
            },
            file: FileMeta {
                name: "GAME_20240315_140000_CAM_L.mp4".to_string(),
                size_bytes: 1024,
                container: "mp4".to_string(),
                codec: "h264".to_string(),
            },
            video: VideoMeta {
                width: 3840,
                height: 2160,
                fps: 30,
                bitrate_mbps: 30,
                duration_sec: 1.5,
            },
            timing: TimingMeta {
                start_time: Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2024, 3, 15, 14, 0, 2).unwrap(),
                sync_ok: true,
                sync_offset_ms: 0.4,
            },
            checksum: ChecksumMeta {
                algorithm: "sha256".to_string(),
                value: "ab".repeat(32),
            },
            device: DeviceMeta {
                hostname: "cam-l".to_string(),
                endpoint: "http://10.0.0.2:7700".to_string(),
                software_version: "0.1.0".to_string(),
            },
            quality: QualityMeta {
                dropped_frames: 0,
                temperature_avg_c: 51.0,
                temperature_max_c: 55.5,
            },
            expected_cameras: vec!["CAM_L".into(), "CAM_C".into(), "CAM_R".into()],
        }
    }

    #[test]
    fn round_trips() {
        let json = sample().to_json_pretty();
        let back = Manifest::from_json(json.as_bytes()).unwrap();
        assert_eq!(back.recording.node_id, "CAM_L");
        assert_eq!(back.checksum.value, "ab".repeat(32));
    }

    #[test]
    fn tolerates_unknown_fields() {
        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json_pretty()).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(Manifest::from_json(&bytes).is_ok());
    }

    #[test]
    fn rejects_unknown_major_version() {
        let mut value: serde_json::Value = serde_json::from_str(&sample().to_json_pretty()).unwrap();
        value["version"] = serde_json::json!("2");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            Manifest::from_json(&bytes),
            Err(ManifestError::UnsupportedVersion(_))
        ));
    }
}
