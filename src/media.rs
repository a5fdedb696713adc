// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Media inspector — metadata extraction, thumbnails, and file-level
//! operations on recorded segments.
//!
//! [`FfmpegInspector`] shells out to `ffprobe`/`ffmpeg`; probing parses the
//! JSON report (`-print_format json`). A native binding could implement the
//! same trait without touching the callers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::error::{NvrError, Result};
use crate::storage::segment::{Segment, SegmentMetadata, StreamInfo};

/// Strftime pattern of segment basenames, rendered from UTC.
pub const SEGMENT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Media-level collaborator consumed by the recorder, retention, and
/// export paths.
#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Probe a freshly closed file: duration, codec, resolution, bitrate.
    /// `start_time` is derived as modification instant minus duration.
    async fn extract_metadata(&self, path: &Path) -> Result<SegmentMetadata>;

    /// Grab the midpoint frame as a JPEG under the thumbnail root,
    /// mirroring the camera subdirectory. Returns the thumbnail path.
    async fn generate_thumbnail(&self, segment_path: &Path) -> Result<PathBuf>;

    /// Streaming SHA-256 of the file contents, hex-encoded.
    async fn calculate_checksum(&self, path: &Path) -> Result<String>;

    /// Remove the segment file and its thumbnail. Already-absent files
    /// count as success.
    async fn delete(&self, segment: &Segment) -> Result<()>;

    /// Cheap validity check of a media file.
    async fn validate(&self, path: &Path) -> Result<()>;

    /// Concatenate segments into `output_path` without re-encoding.
    /// Fails on an empty input list.
    async fn merge(&self, paths: &[PathBuf], output_path: &Path) -> Result<()>;

    async fn get_stream_info(&self, path: &Path) -> Result<StreamInfo>;

    /// Deterministic segment path:
    /// `{storage_root}/{camera_id}/{YYYY-MM-DD_HH-mm-ss}.mp4`.
    fn compose_path(&self, camera_id: &str, start_time: DateTime<Utc>) -> PathBuf;
}

/// [`MediaInspector`] backed by the ffmpeg command-line tools.
pub struct FfmpegInspector {
    storage_root: PathBuf,
    thumbnail_root: PathBuf,
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegInspector {
    pub fn new(
        storage_root: PathBuf,
        thumbnail_root: PathBuf,
        ffmpeg_path: String,
        ffprobe_path: String,
    ) -> Self {
        Self { storage_root, thumbnail_root, ffmpeg_path, ffprobe_path }
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NvrError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("ffprobe failed on {path:?}: {}", stderr.trim()),
            )));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| {
            NvrError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("unparseable ffprobe report for {path:?}: {e}"),
            ))
        })
    }

    async fn run_ffmpeg(&self, args: Vec<String>, what: &str) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NvrError::Io(std::io::Error::other(format!(
                "{what} failed: {}",
                stderr.trim()
            ))));
        }
        Ok(())
    }

    /// Thumbnail path for a segment file, mirroring the camera directory:
    /// `{thumbnail_root}/{camera_id}/{basename}.jpg`.
    fn thumbnail_path_for(&self, segment_path: &Path) -> PathBuf {
        let camera_id = segment_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let basename = segment_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.thumbnail_root.join(camera_id).join(format!("{basename}.jpg"))
    }
}

#[async_trait]
impl MediaInspector for FfmpegInspector {
    async fn extract_metadata(&self, path: &Path) -> Result<SegmentMetadata> {
        let stat = tokio::fs::metadata(path).await?;
        let mtime: DateTime<Utc> = stat.modified()?.into();

        let report = self.probe(path).await?;
        let duration_seconds = report.format.duration();
        let bitrate_bps = report.format.bit_rate();
        let (codec, resolution) = match report.video_stream() {
            Some(v) => (
                v.codec_name.clone().unwrap_or_default(),
                format!("{}x{}", v.width.unwrap_or(0), v.height.unwrap_or(0)),
            ),
            None => (String::new(), String::new()),
        };

        let start_time = mtime - chrono::Duration::milliseconds((duration_seconds * 1000.0) as i64);
        Ok(SegmentMetadata {
            duration_seconds,
            codec,
            resolution,
            bitrate_bps,
            file_size_bytes: stat.len(),
            start_time,
            end_time: mtime,
        })
    }

    async fn generate_thumbnail(&self, segment_path: &Path) -> Result<PathBuf> {
        let thumb = self.thumbnail_path_for(segment_path);
        if let Some(parent) = thumb.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Midpoint frame; fall back to the first frame for zero-length files.
        let midpoint = match self.probe(segment_path).await {
            Ok(report) => report.format.duration() / 2.0,
            Err(_) => 0.0,
        };

        let args = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-ss".into(),
            format!("{midpoint:.3}"),
            "-i".into(),
            segment_path.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-q:v".into(),
            "4".into(),
            thumb.to_string_lossy().into_owned(),
        ];
        self.run_ffmpeg(args, "thumbnail generation").await?;
        debug!(segment = ?segment_path, thumbnail = ?thumb, "thumbnail written");
        Ok(thumb)
    }

    async fn calculate_checksum(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            std::io::copy(&mut file, &mut hasher)?;
            Ok(hex::encode(hasher.finalize()))
        })
        .await
        .map_err(|e| NvrError::Internal(format!("checksum task panicked: {e}")))?
    }

    async fn delete(&self, segment: &Segment) -> Result<()> {
        remove_if_present(&segment.file_path).await?;
        let thumb = segment
            .thumbnail_path
            .clone()
            .unwrap_or_else(|| self.thumbnail_path_for(&segment.file_path));
        remove_if_present(&thumb).await?;
        Ok(())
    }

    async fn validate(&self, path: &Path) -> Result<()> {
        match self.probe(path).await {
            Ok(report) if report.video_stream().is_some() => Ok(()),
            Ok(_) => Err(NvrError::InvalidArgument(format!(
                "{path:?} carries no video stream"
            ))),
            Err(_) => Err(NvrError::InvalidArgument(format!(
                "{path:?} is not a readable media file"
            ))),
        }
    }

    async fn merge(&self, paths: &[PathBuf], output_path: &Path) -> Result<()> {
        if paths.is_empty() {
            return Err(NvrError::InvalidArgument("no segments to merge".into()));
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Concat demuxer list; single quotes in paths are escaped per the
        // ffmpeg quoting rules.
        let mut list = String::new();
        for path in paths {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            list.push_str(&format!("file '{escaped}'\n"));
        }
        let list_path = output_path.with_extension("concat.txt");
        tokio::fs::write(&list_path, list).await?;

        let args = vec![
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list_path.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            output_path.to_string_lossy().into_owned(),
        ];
        let result = self.run_ffmpeg(args, "segment merge").await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    async fn get_stream_info(&self, path: &Path) -> Result<StreamInfo> {
        let report = self.probe(path).await?;
        let video = report.video_stream().ok_or_else(|| {
            NvrError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("{path:?} carries no video stream"),
            ))
        })?;
        let audio = report.audio_stream();
        Ok(StreamInfo {
            video_codec: video.codec_name.clone().unwrap_or_default(),
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            fps: parse_rate(video.avg_frame_rate.as_deref().or(video.r_frame_rate.as_deref())),
            has_audio: audio.is_some(),
            audio_codec: audio.and_then(|a| a.codec_name.clone()),
            bitrate_bps: report.format.bit_rate(),
            duration_seconds: report.format.duration(),
        })
    }

    fn compose_path(&self, camera_id: &str, start_time: DateTime<Utc>) -> PathBuf {
        self.storage_root
            .join(camera_id)
            .join(format!("{}.mp4", start_time.format(SEGMENT_TIME_FORMAT)))
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Parse an ffprobe `a/b` frame-rate string. `"0/0"` and garbage map to 0.
fn parse_rate(rate: Option<&str>) -> f64 {
    let Some(rate) = rate else { return 0.0 };
    let mut parts = rate.splitn(2, '/');
    let num: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0.0);
    let den: f64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1.0);
    if den == 0.0 { 0.0 } else { num / den }
}

// ─────────────────────── ffprobe JSON report ────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

impl ProbeReport {
    fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"))
    }

    fn audio_stream(&self) -> Option<&ProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    /// Seconds, as a decimal string.
    duration: Option<String>,
    /// Bits per second, as a decimal string.
    bit_rate: Option<String>,
}

impl ProbeFormat {
    fn duration(&self) -> f64 {
        self.duration.as_deref().and_then(|d| d.parse().ok()).unwrap_or(0.0)
    }

    fn bit_rate(&self) -> u64 {
        self.bit_rate.as_deref().and_then(|b| b.parse().ok()).unwrap_or(0)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}
