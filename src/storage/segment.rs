// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Segment data model — one recorded file and its index entry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NvrError, Result};

/// Storage-class label on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageTier::Hot => write!(f, "hot"),
            StorageTier::Warm => write!(f, "warm"),
            StorageTier::Cold => write!(f, "cold"),
        }
    }
}

/// Why a segment was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Continuous,
    Motion,
    Events,
}

/// One recorded segment: the file on disk plus everything the index knows
/// about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Opaque unique identifier. Assigned by the repository when empty.
    pub id: String,
    pub camera_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Absolute path of the backing file.
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    pub storage_tier: StorageTier,
    pub has_events: bool,
    pub event_count: u32,
    pub codec: String,
    /// `"WxH"`, e.g. `"1920x1080"`.
    pub resolution: String,
    pub bitrate_bps: u64,
    pub thumbnail_path: Option<PathBuf>,
    /// Hex-encoded content hash.
    pub checksum: Option<String>,
    pub recording_mode: RecordingMode,
    pub trigger_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// Check the single-record invariants. Cross-record invariants (unique
    /// `file_path`) are enforced by the repository.
    pub fn validate(&self) -> Result<()> {
        if self.camera_id.is_empty() {
            return Err(NvrError::InvalidArgument("segment has no camera_id".into()));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(NvrError::InvalidArgument("segment has no file_path".into()));
        }
        if !self.file_path.is_absolute() {
            return Err(NvrError::InvalidArgument(format!(
                "segment file_path {:?} is not absolute",
                self.file_path
            )));
        }
        if self.duration_seconds < 0.0 {
            return Err(NvrError::InvalidArgument(format!(
                "negative duration {}",
                self.duration_seconds
            )));
        }
        if self.end_time < self.start_time {
            return Err(NvrError::InvalidArgument(
                "end_time precedes start_time".into(),
            ));
        }
        if self.duration_seconds > 0.0 && self.start_time >= self.end_time {
            return Err(NvrError::InvalidArgument(
                "positive duration requires start_time < end_time".into(),
            ));
        }
        if self.event_count > 0 && !self.has_events {
            return Err(NvrError::InvalidArgument(
                "event_count > 0 requires has_events".into(),
            ));
        }
        Ok(())
    }
}

/// What the media inspector reports for a freshly closed file.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMetadata {
    pub duration_seconds: f64,
    pub codec: String,
    pub resolution: String,
    pub bitrate_bps: u64,
    pub file_size_bytes: u64,
    /// Modification instant minus duration.
    pub start_time: DateTime<Utc>,
    /// Modification instant.
    pub end_time: DateTime<Utc>,
}

/// Container-level stream description of a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
    pub bitrate_bps: u64,
    pub duration_seconds: f64,
}
