use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::error::{NvrError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Storage and segmenter configuration.
    pub storage: StorageConfig,
    /// Retention windows and cleanup cadence.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// List of cameras to record.
    pub cameras: Vec<CameraConfig>,
    /// Path of the `ffmpeg` binary used for capture and media operations.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path of the `ffprobe` binary used for metadata extraction.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

/// Storage parameters for the segment tree.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for recorded segments: `{storage_path}/{camera_id}/...`.
    pub storage_path: PathBuf,
    /// Root directory for thumbnails, mirroring the camera subdirectories.
    pub thumbnail_path: PathBuf,
    /// Duration of a single recorded segment in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,
    /// Global storage cap in gigabytes. 0 disables cap enforcement.
    #[serde(default)]
    pub max_storage_gb: f64,
    /// Hardware-acceleration arguments prepended to the input side of the
    /// capture command. Treated as an opaque prefix.
    #[serde(default)]
    pub hwaccel_args: Vec<String>,
}

/// Retention windows applied to every camera unless overridden per camera.
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    /// Days to keep segments without events.
    #[serde(default = "default_retention_days")]
    pub default_days: u32,
    /// Days to keep event-bearing segments. Defaults to `2 * default_days`.
    #[serde(default)]
    pub events_days: Option<u32>,
    /// Seconds between cleanup cycles.
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: default_retention_days(),
            events_days: None,
            interval_secs: default_retention_interval(),
        }
    }
}

/// Which stream of a camera feeds the recorder.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordRole {
    /// Record the main (full-resolution) stream.
    #[default]
    Main,
    /// Record the substream when one is configured.
    Sub,
}

/// Per-camera configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Unique identifier used for directory/file naming.
    pub id: String,
    /// Human-readable label shown in status output.
    pub name: String,
    /// RTSP (or RTMP/HTTP) URL of the camera's main stream.
    pub url: String,
    /// Optional lower-resolution substream URL.
    #[serde(default)]
    pub substream_url: Option<String>,
    /// Credentials injected into the stream URL when it carries none.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Whether continuous recording is enabled for this camera.
    #[serde(default = "default_record")]
    pub record: bool,
    /// Which stream the recorder consumes.
    #[serde(default)]
    pub record_role: RecordRole,
    /// Per-camera retention override for non-event segments.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Per-camera retention override for event-bearing segments.
    #[serde(default)]
    pub events_retention_days: Option<u32>,
}

fn default_segment_duration() -> u64 { 10 }
fn default_retention_days() -> u32 { 30 }
fn default_retention_interval() -> u64 { 3600 }
fn default_record() -> bool { true }
fn default_ffmpeg_path() -> String { "ffmpeg".into() }
fn default_ffprobe_path() -> String { "ffprobe".into() }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NvrError::InvalidArgument(format!("cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| NvrError::InvalidArgument(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.segment_duration_secs == 0 {
            return Err(NvrError::InvalidArgument(
                "segment_duration_secs must be > 0".into(),
            ));
        }
        if self.storage.max_storage_gb < 0.0 {
            return Err(NvrError::InvalidArgument(
                "max_storage_gb must be >= 0".into(),
            ));
        }
        if let Some(events_days) = self.retention.events_days {
            if events_days < self.retention.default_days {
                return Err(NvrError::InvalidArgument(
                    "retention.events_days must be >= retention.default_days".into(),
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for cam in &self.cameras {
            cam.validate()?;
            if !seen.insert(cam.id.as_str()) {
                return Err(NvrError::InvalidArgument(format!(
                    "duplicate camera id '{}'",
                    cam.id
                )));
            }
        }
        Ok(())
    }

    /// Look up a camera by id.
    pub fn camera(&self, camera_id: &str) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == camera_id)
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(NvrError::InvalidArgument("camera id must not be empty".into()));
        }
        // Camera ids become path components.
        if self.id.contains(['/', '\\']) || self.id.starts_with('.') {
            return Err(NvrError::InvalidArgument(format!(
                "camera id '{}' is not a safe path component",
                self.id
            )));
        }
        if self.url.is_empty() {
            return Err(NvrError::InvalidArgument(format!(
                "camera '{}' has no stream URL",
                self.id
            )));
        }
        if let (Some(events), Some(default)) = (self.events_retention_days, self.retention_days) {
            if events < default {
                return Err(NvrError::InvalidArgument(format!(
                    "camera '{}': events_retention_days must be >= retention_days",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
