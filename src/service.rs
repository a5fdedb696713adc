// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Recording service: owns the per-camera recorders, fans out config
//! changes, and exposes the core recording API to the surrounding system.
//!
//! The service also implements the internal completion sink: when a
//! recorder hands off a closed segment, the sink generates its thumbnail,
//! persists the record through the repository, and forwards the stored
//! record to the external notifier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CameraConfig, Config};
use crate::error::{NvrError, Result};
use crate::media::MediaInspector;
use crate::process::SubprocessRunner;
use crate::recorder::{Recorder, RecorderStatus, SegmentNotifier};
use crate::retention::{RetentionManager, RetentionStats};
use crate::storage::repository::{ListOptions, SegmentPage, SegmentRepository, StorageStats};
use crate::storage::segment::Segment;
use crate::timeline::{Timeline, TimelineAssembler, TimelineSegment};

/// Top-level coordinator of the recording core.
pub struct RecordingService {
    config: Arc<RwLock<Config>>,
    repository: Arc<dyn SegmentRepository>,
    inspector: Arc<dyn MediaInspector>,
    runner: Arc<dyn SubprocessRunner>,
    sink: Arc<CompletionSink>,
    recorders: RwLock<HashMap<String, Arc<Recorder>>>,
    timeline: TimelineAssembler,
    retention: Arc<RetentionManager>,
    running: Mutex<Option<CancellationToken>>,
}

impl RecordingService {
    pub fn new(
        config: Config,
        repository: Arc<dyn SegmentRepository>,
        inspector: Arc<dyn MediaInspector>,
        runner: Arc<dyn SubprocessRunner>,
        notifier: Arc<dyn SegmentNotifier>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(RwLock::new(config));
        let retention = Arc::new(RetentionManager::new(
            repository.clone(),
            inspector.clone(),
            config.clone(),
        ));
        let sink = Arc::new(CompletionSink {
            repository: repository.clone(),
            inspector: inspector.clone(),
            notifier,
        });
        Ok(Self {
            config,
            repository: repository.clone(),
            inspector,
            runner,
            sink,
            recorders: RwLock::new(HashMap::new()),
            timeline: TimelineAssembler::new(repository),
            retention,
            running: Mutex::new(None),
        })
    }

    // ───────────────────────── lifecycle ─────────────────────────────────

    /// Start recorders for every recording-enabled camera and the retention
    /// loop. Idempotent.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let token = {
            let mut running = self.running.lock();
            if running.is_some() {
                return Ok(());
            }
            let token = parent.child_token();
            *running = Some(token.clone());
            token
        };

        let cfg = self.config.read().clone();
        tokio::fs::create_dir_all(&cfg.storage.storage_path).await?;
        tokio::fs::create_dir_all(&cfg.storage.thumbnail_path).await?;

        for camera in cfg.cameras.iter().filter(|c| c.record) {
            if let Err(e) = self.start_camera(&camera.id).await {
                warn!(camera = camera.id, error = %e, "failed to start recorder");
            }
        }
        self.retention
            .start(&token, Duration::from_secs(cfg.retention.interval_secs));

        info!(cameras = cfg.cameras.len(), "recording service started");
        Ok(())
    }

    /// Stop every recorder and the retention loop. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let Some(token) = self.running.lock().take() else {
            return Ok(());
        };
        token.cancel();

        let recorders: Vec<Arc<Recorder>> = self.recorders.read().values().cloned().collect();
        for recorder in recorders {
            if let Err(e) = recorder.stop().await {
                warn!(camera = recorder.camera_id(), error = %e, "recorder stop failed");
            }
        }
        self.retention.stop();
        info!("recording service stopped");
        Ok(())
    }

    // ───────────────────── per-camera operations ─────────────────────────

    /// Start (or ensure) recording for one configured camera.
    pub async fn start_camera(&self, camera_id: &str) -> Result<()> {
        let camera = self
            .config
            .read()
            .camera(camera_id)
            .cloned()
            .ok_or_else(|| NvrError::camera_not_found(camera_id))?;
        let recorder = self.recorder_for(&camera);
        recorder.start().await
    }

    /// Stop recording for one camera. No-op when not running.
    pub async fn stop_camera(&self, camera_id: &str) -> Result<()> {
        let recorder = self.recorders.read().get(camera_id).cloned();
        match recorder {
            Some(recorder) => recorder.stop().await,
            None => Ok(()),
        }
    }

    pub async fn restart_camera(&self, camera_id: &str) -> Result<()> {
        self.stop_camera(camera_id).await?;
        // Rebuild the recorder so a changed camera config takes effect.
        if let Some(camera) = self.config.read().camera(camera_id) {
            let stale = self
                .recorders
                .read()
                .get(camera_id)
                .map(|r| r.camera_config() != camera)
                .unwrap_or(false);
            if stale {
                self.recorders.write().remove(camera_id);
            }
        }
        self.start_camera(camera_id).await
    }

    /// Make sure the camera is recording so the given event lands on a
    /// segment. Event attachment itself happens in the surrounding system.
    pub async fn trigger_event_recording(&self, camera_id: &str, event_id: &str) -> Result<()> {
        if self.config.read().camera(camera_id).is_none() {
            return Err(NvrError::camera_not_found(camera_id));
        }
        info!(camera = camera_id, event = event_id, "event recording requested");
        self.start_camera(camera_id).await
    }

    // ─────────────────────── segment operations ──────────────────────────

    pub async fn get_segment(&self, id: &str) -> Result<Segment> {
        self.repository.get(id).await
    }

    pub async fn list_segments(&self, options: &ListOptions) -> Result<SegmentPage> {
        self.repository.list(options).await
    }

    /// Delete one segment: backing file and index entry.
    pub async fn delete_segment(&self, id: &str) -> Result<()> {
        let segment = self.repository.get(id).await?;
        self.retention.delete_segment(&segment).await?;
        Ok(())
    }

    /// Return the segment's thumbnail path, generating one if the recorded
    /// path is missing or the file is gone.
    pub async fn generate_thumbnail(&self, segment_id: &str) -> Result<PathBuf> {
        let segment = self.repository.get(segment_id).await?;
        if let Some(thumb) = &segment.thumbnail_path {
            if tokio::fs::try_exists(thumb).await.unwrap_or(false) {
                return Ok(thumb.clone());
            }
        }
        let thumb = self.inspector.generate_thumbnail(&segment.file_path).await?;
        let mut updated = segment;
        updated.thumbnail_path = Some(thumb.clone());
        self.repository.update(updated).await?;
        Ok(thumb)
    }

    /// Merge all segments overlapping `[start, end]` into one container at
    /// `output_path`. Returns the number of segments merged.
    pub async fn export_segments(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output_path: &Path,
    ) -> Result<usize> {
        let segments = self.repository.get_by_time_range(camera_id, start, end).await?;
        if segments.is_empty() {
            return Err(NvrError::NotFound {
                what: format!("segments for camera '{camera_id}' in {start} — {end}"),
            });
        }
        let paths: Vec<PathBuf> = segments.iter().map(|s| s.file_path.clone()).collect();
        self.inspector.merge(&paths, output_path).await?;
        info!(
            camera = camera_id,
            segments = segments.len(),
            output = ?output_path,
            "export complete"
        );
        Ok(segments.len())
    }

    // ─────────────────────── timeline / status ───────────────────────────

    pub async fn get_timeline(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Timeline> {
        self.timeline.build_timeline(camera_id, start, end).await
    }

    pub async fn get_timeline_segments(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineSegment>> {
        Ok(self.timeline.build_timeline(camera_id, start, end).await?.segments)
    }

    /// The file containing `instant` plus the playback offset into it.
    pub async fn get_playback_info(
        &self,
        camera_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<(PathBuf, f64)> {
        self.timeline.get_playback_url(camera_id, instant).await
    }

    /// Status snapshot for one camera; Idle when no recorder is running.
    pub fn get_recorder_status(&self, camera_id: &str) -> RecorderStatus {
        match self.recorders.read().get(camera_id) {
            Some(recorder) => recorder.status(),
            None => RecorderStatus::idle(camera_id),
        }
    }

    /// Snapshots for every configured camera.
    pub fn get_all_recorder_status(&self) -> HashMap<String, RecorderStatus> {
        let mut statuses: HashMap<String, RecorderStatus> = self
            .config
            .read()
            .cameras
            .iter()
            .map(|c| (c.id.clone(), RecorderStatus::idle(&c.id)))
            .collect();
        for (id, recorder) in self.recorders.read().iter() {
            statuses.insert(id.clone(), recorder.status());
        }
        statuses
    }

    /// Index-level storage aggregates plus the configured cap.
    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let by_camera = self.repository.get_storage_by_camera().await?;
        let by_tier = self.repository.get_storage_by_tier().await?;
        let used_bytes: u64 = by_camera.values().sum();
        let mut segment_count = 0u64;
        for camera_id in by_camera.keys() {
            segment_count += self.repository.get_segment_count(camera_id).await?;
        }
        let cap_gb = self.config.read().storage.max_storage_gb;
        let total_bytes = (cap_gb * (1u64 << 30) as f64) as u64;
        Ok(StorageStats {
            total_bytes,
            used_bytes,
            available_bytes: total_bytes.saturating_sub(used_bytes),
            segment_count,
            by_camera,
            by_tier,
        })
    }

    /// Run one retention cycle immediately.
    pub async fn run_retention(&self) -> Result<RetentionStats> {
        self.retention.run_cycle().await
    }

    // ───────────────────── configuration fan-out ─────────────────────────

    /// Swap the configuration and reconcile recorders with it: removed or
    /// disabled cameras stop, new or changed ones (re)start.
    pub async fn on_config_change(&self, new_config: Config) -> Result<()> {
        new_config.validate()?;
        let old = self.config.read().clone();
        *self.config.write() = new_config.clone();

        for camera in &old.cameras {
            let kept = new_config.camera(&camera.id);
            let still_recording = kept.map(|c| c.record).unwrap_or(false);
            if !still_recording {
                if let Err(e) = self.stop_camera(&camera.id).await {
                    warn!(camera = camera.id, error = %e, "failed to stop removed camera");
                }
                if kept.is_none() {
                    self.recorders.write().remove(&camera.id);
                }
            }
        }

        if self.running.lock().is_some() {
            for camera in new_config.cameras.iter().filter(|c| c.record) {
                let changed = old.camera(&camera.id).map(|c| c != camera).unwrap_or(true);
                let result = if changed {
                    self.restart_camera(&camera.id).await
                } else {
                    self.start_camera(&camera.id).await
                };
                if let Err(e) = result {
                    warn!(camera = camera.id, error = %e, "failed to reconcile recorder");
                }
            }
        }
        info!(cameras = new_config.cameras.len(), "configuration applied");
        Ok(())
    }

    /// Upsert one camera; restarts its recorder when the config changed
    /// while running.
    pub async fn update_camera_config(&self, camera: CameraConfig) -> Result<()> {
        camera.validate()?;
        let (changed, was_running) = {
            let mut cfg = self.config.read().clone();
            let prev = cfg.camera(&camera.id).cloned();
            match cfg.cameras.iter_mut().find(|c| c.id == camera.id) {
                Some(slot) => *slot = camera.clone(),
                None => cfg.cameras.push(camera.clone()),
            }
            cfg.validate()?;
            *self.config.write() = cfg;

            let was_running = self
                .recorders
                .read()
                .get(&camera.id)
                .map(|r| {
                    matches!(
                        r.status().state,
                        crate::recorder::RecorderState::Starting
                            | crate::recorder::RecorderState::Running
                    )
                })
                .unwrap_or(false);
            (prev.as_ref() != Some(&camera), was_running)
        };

        if changed && was_running {
            self.stop_camera(&camera.id).await?;
            self.recorders.write().remove(&camera.id);
            if camera.record {
                self.start_camera(&camera.id).await?;
            }
        }
        Ok(())
    }

    /// Stop and forget one camera.
    pub async fn remove_camera_config(&self, camera_id: &str) -> Result<()> {
        let recorder = self.recorders.write().remove(camera_id);
        if let Some(recorder) = recorder {
            recorder.stop().await?;
        }
        let mut cfg = self.config.read().clone();
        cfg.cameras.retain(|c| c.id != camera_id);
        *self.config.write() = cfg;
        info!(camera = camera_id, "camera removed");
        Ok(())
    }

    /// Existing recorder for the camera, or a freshly built one. The
    /// registry lock is released before any recorder I/O.
    fn recorder_for(&self, camera: &CameraConfig) -> Arc<Recorder> {
        if let Some(recorder) = self.recorders.read().get(&camera.id) {
            return recorder.clone();
        }
        let (storage, ffmpeg_path) = {
            let cfg = self.config.read();
            (cfg.storage.clone(), cfg.ffmpeg_path.clone())
        };
        let mut recorders = self.recorders.write();
        recorders
            .entry(camera.id.clone())
            .or_insert_with(|| {
                Arc::new(Recorder::new(
                    camera.clone(),
                    storage,
                    ffmpeg_path,
                    self.runner.clone(),
                    self.inspector.clone(),
                    self.sink.clone(),
                ))
            })
            .clone()
    }
}

/// Internal completion sink: thumbnail → persist → notify.
struct CompletionSink {
    repository: Arc<dyn SegmentRepository>,
    inspector: Arc<dyn MediaInspector>,
    notifier: Arc<dyn SegmentNotifier>,
}

#[async_trait::async_trait]
impl SegmentNotifier for CompletionSink {
    async fn on_segment_complete(&self, mut segment: Segment) {
        match self.inspector.generate_thumbnail(&segment.file_path).await {
            Ok(thumb) => segment.thumbnail_path = Some(thumb),
            Err(e) => {
                warn!(segment = ?segment.file_path, error = %e, "thumbnail generation failed");
            }
        }
        let stored = match self.repository.create(segment).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to index completed segment, dropping");
                return;
            }
        };
        self.notifier.on_segment_complete(stored).await;
    }
}
