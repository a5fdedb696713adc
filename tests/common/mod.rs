// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared test fakes: a scripted subprocess runner, a filesystem-faithful
//! media inspector, and a collecting segment notifier.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use nvr_core::error::{NvrError, Result};
use nvr_core::media::{MediaInspector, SEGMENT_TIME_FORMAT};
use nvr_core::process::{ExitOutcome, SpawnedProcess, SubprocessRunner};
use nvr_core::recorder::SegmentNotifier;
use nvr_core::storage::segment::{
    RecordingMode, Segment, SegmentMetadata, StorageTier, StreamInfo,
};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
}

/// Build a plausible segment record for index-level tests.
pub fn segment_at(camera_id: &str, start: DateTime<Utc>, duration_secs: f64, size: u64) -> Segment {
    let end = start + chrono::Duration::milliseconds((duration_secs * 1000.0) as i64);
    let file = PathBuf::from(format!(
        "/r/{camera_id}/{}.mp4",
        start.format(SEGMENT_TIME_FORMAT)
    ));
    Segment {
        id: String::new(),
        camera_id: camera_id.to_string(),
        start_time: start,
        end_time: end,
        duration_seconds: duration_secs,
        file_path: file,
        file_size_bytes: size,
        storage_tier: StorageTier::Hot,
        has_events: false,
        event_count: 0,
        codec: "h264".into(),
        resolution: "1920x1080".into(),
        bitrate_bps: 4_000_000,
        thumbnail_path: None,
        checksum: None,
        recording_mode: RecordingMode::Continuous,
        trigger_event_id: None,
        created_at: start,
        updated_at: start,
    }
}

// ───────────────────────── scripted runner ───────────────────────────────

/// One scripted child process: its stderr lines and exit behavior.
pub struct ScriptedProcess {
    pub lines: Vec<String>,
    pub exit: ExitOutcome,
    /// Keep the child "running" until the token is cancelled.
    pub wait_for_cancel: bool,
}

impl ScriptedProcess {
    pub fn exiting(lines: Vec<String>, success: bool) -> Self {
        Self {
            lines,
            exit: ExitOutcome { success, code: Some(i32::from(!success)) },
            wait_for_cancel: false,
        }
    }

    pub fn until_cancel(lines: Vec<String>) -> Self {
        Self {
            lines,
            exit: ExitOutcome { success: true, code: Some(0) },
            wait_for_cancel: true,
        }
    }
}

/// [`SubprocessRunner`] replaying scripted children in order.
#[derive(Default)]
pub struct FakeRunner {
    scripts: Mutex<VecDeque<ScriptedProcess>>,
    pub spawns: AtomicUsize,
}

impl FakeRunner {
    pub fn new(scripts: Vec<ScriptedProcess>) -> Self {
        Self { scripts: Mutex::new(scripts.into()), spawns: AtomicUsize::new(0) }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Queue another scripted child behind the existing ones.
    pub fn push(&self, script: ScriptedProcess) {
        self.scripts.lock().expect("scripts lock").push_back(script);
    }
}

#[async_trait]
impl SubprocessRunner for FakeRunner {
    async fn start(&self, _argv: &[String], token: CancellationToken) -> Result<SpawnedProcess> {
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .ok_or_else(|| NvrError::Unavailable("no scripted process left".into()))?;
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let (line_tx, line_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            for line in script.lines {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            if script.wait_for_cancel {
                token.cancelled().await;
            }
            drop(line_tx);
            let _ = exit_tx.send(script.exit);
        });
        Ok(SpawnedProcess { log_lines: line_rx, exit: exit_rx })
    }
}

// ──────────────────────────── fake inspector ─────────────────────────────

/// Inspector fake that works against real files: metadata comes from
/// `stat`, thumbnails are written as small marker files, merge is a byte
/// concatenation.
pub struct FakeInspector {
    pub storage_root: PathBuf,
    pub thumbnail_root: PathBuf,
    /// Reported duration of every probed file.
    pub duration_secs: f64,
    pub fail_metadata: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub thumbnails_generated: AtomicUsize,
}

impl FakeInspector {
    pub fn new(storage_root: PathBuf, thumbnail_root: PathBuf, duration_secs: f64) -> Self {
        Self {
            storage_root,
            thumbnail_root,
            duration_secs,
            fail_metadata: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            thumbnails_generated: AtomicUsize::new(0),
        }
    }

    fn thumbnail_path_for(&self, segment_path: &Path) -> PathBuf {
        let camera = segment_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = segment_path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.thumbnail_root.join(camera).join(format!("{stem}.jpg"))
    }
}

#[async_trait]
impl MediaInspector for FakeInspector {
    async fn extract_metadata(&self, path: &Path) -> Result<SegmentMetadata> {
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(NvrError::Io(std::io::Error::other("probe refused by test")));
        }
        let stat = tokio::fs::metadata(path).await?;
        let mtime: DateTime<Utc> = stat.modified()?.into();
        Ok(SegmentMetadata {
            duration_seconds: self.duration_secs,
            codec: "h264".into(),
            resolution: "1920x1080".into(),
            bitrate_bps: 4_000_000,
            file_size_bytes: stat.len(),
            start_time: mtime - chrono::Duration::milliseconds((self.duration_secs * 1000.0) as i64),
            end_time: mtime,
        })
    }

    async fn generate_thumbnail(&self, segment_path: &Path) -> Result<PathBuf> {
        let thumb = self.thumbnail_path_for(segment_path);
        if let Some(parent) = thumb.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&thumb, b"jpeg").await?;
        self.thumbnails_generated.fetch_add(1, Ordering::SeqCst);
        Ok(thumb)
    }

    async fn calculate_checksum(&self, path: &Path) -> Result<String> {
        let data = tokio::fs::read(path).await?;
        Ok(hex::encode(Sha256::digest(&data)))
    }

    async fn delete(&self, segment: &Segment) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(NvrError::Io(std::io::Error::other("delete refused by test")));
        }
        for path in [Some(segment.file_path.clone()), segment.thumbnail_path.clone()]
            .into_iter()
            .flatten()
        {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn validate(&self, path: &Path) -> Result<()> {
        tokio::fs::metadata(path).await?;
        Ok(())
    }

    async fn merge(&self, paths: &[PathBuf], output_path: &Path) -> Result<()> {
        if paths.is_empty() {
            return Err(NvrError::InvalidArgument("no segments to merge".into()));
        }
        let mut merged = Vec::new();
        for path in paths {
            merged.extend(tokio::fs::read(path).await?);
        }
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output_path, merged).await?;
        Ok(())
    }

    async fn get_stream_info(&self, _path: &Path) -> Result<StreamInfo> {
        Ok(StreamInfo {
            video_codec: "h264".into(),
            width: 1920,
            height: 1080,
            fps: 25.0,
            has_audio: false,
            audio_codec: None,
            bitrate_bps: 4_000_000,
            duration_seconds: self.duration_secs,
        })
    }

    fn compose_path(&self, camera_id: &str, start_time: DateTime<Utc>) -> PathBuf {
        self.storage_root
            .join(camera_id)
            .join(format!("{}.mp4", start_time.format(SEGMENT_TIME_FORMAT)))
    }
}

// ─────────────────────────── collecting sink ─────────────────────────────

/// Notifier that records every completed segment.
#[derive(Default)]
pub struct CollectingNotifier {
    segments: Mutex<Vec<Segment>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<Segment> {
        self.segments.lock().expect("segments lock").clone()
    }

    /// Poll until `count` segments arrived or the deadline passes.
    pub async fn wait_for(&self, count: usize, deadline: Duration) -> bool {
        let end = tokio::time::Instant::now() + deadline;
        while tokio::time::Instant::now() < end {
            if self.collected().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

#[async_trait]
impl SegmentNotifier for CollectingNotifier {
    async fn on_segment_complete(&self, segment: Segment) {
        self.segments.lock().expect("segments lock").push(segment);
    }
}
