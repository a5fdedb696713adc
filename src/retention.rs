// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention and tiering controller.
//!
//! One periodic loop per deployment. Each cycle:
//!  1. Per-camera age cleanup — non-event segments past the camera's
//!     default window, event-bearing segments past the (longer) events
//!     window, in batches.
//!  2. Global cap enforcement — when on-disk usage exceeds the configured
//!     byte budget, the overshoot is freed proportionally across cameras,
//!     oldest first, preferring non-event segments.
//!
//! Per-camera and per-segment failures are logged and skipped; a cycle
//! never takes the loop down.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CameraConfig, Config, RetentionConfig};
use crate::error::Result;
use crate::media::MediaInspector;
use crate::storage::repository::{ListOptions, OrderBy, SegmentRepository};
use crate::storage::segment::{Segment, StorageTier};

/// Batch size for age-based deletion.
const AGE_BATCH: usize = 1000;
/// Batch size for cap enforcement.
const CAP_BATCH: usize = 100;
/// Usage is freed down to this fraction of the cap.
const CAP_TARGET_RATIO: f64 = 0.9;

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Outcome of one cleanup cycle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetentionStats {
    pub segments_deleted: u64,
    pub bytes_freed: u64,
    pub oldest_remaining: Option<DateTime<Utc>>,
    pub newest_remaining: Option<DateTime<Utc>>,
}

struct LoopHandle {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Periodic retention/tiering control loop.
pub struct RetentionManager {
    repository: Arc<dyn SegmentRepository>,
    inspector: Arc<dyn MediaInspector>,
    config: Arc<RwLock<Config>>,
    task: Mutex<Option<LoopHandle>>,
}

impl RetentionManager {
    pub fn new(
        repository: Arc<dyn SegmentRepository>,
        inspector: Arc<dyn MediaInspector>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self { repository, inspector, config, task: Mutex::new(None) }
    }

    /// Start the loop. The first cycle runs immediately; the loop stops on
    /// [`RetentionManager::stop`] or cancellation of `parent`. A second
    /// `start` is a no-op.
    pub fn start(self: &Arc<Self>, parent: &CancellationToken, interval: Duration) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("retention loop already running");
            return;
        }
        let token = parent.child_token();
        let loop_token = token.clone();
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "retention loop started");
            loop {
                match manager.run_cycle().await {
                    Ok(stats) => info!(
                        deleted = stats.segments_deleted,
                        freed = stats.bytes_freed,
                        "retention cycle complete"
                    ),
                    Err(e) => warn!(error = %e, "retention cycle failed"),
                }
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("retention loop stopped");
        });
        *task = Some(LoopHandle { token, _handle: handle });
    }

    /// Close the loop signal. Idempotent.
    pub fn stop(&self) {
        if let Some(run) = self.task.lock().take() {
            run.token.cancel();
        }
    }

    /// Run one full cleanup cycle: per-camera age windows, then the global
    /// storage cap.
    pub async fn run_cycle(&self) -> Result<RetentionStats> {
        let cfg = self.config.read().clone();
        let now = Utc::now();
        let mut stats = RetentionStats::default();

        for camera in cfg.cameras.iter().filter(|c| c.record) {
            match self.cleanup_camera(camera, &cfg.retention, now).await {
                Ok((deleted, freed)) => {
                    stats.segments_deleted += deleted;
                    stats.bytes_freed += freed;
                }
                Err(e) => {
                    warn!(camera = camera.id, error = %e, "camera cleanup failed");
                }
            }
        }

        if cfg.storage.max_storage_gb > 0.0 {
            match self.enforce_global_cap(&cfg).await {
                Ok((deleted, freed)) => {
                    stats.segments_deleted += deleted;
                    stats.bytes_freed += freed;
                }
                Err(e) => warn!(error = %e, "global cap enforcement failed"),
            }
        }

        let oldest = self
            .repository
            .list(&ListOptions { limit: 1, ..ListOptions::default() })
            .await?;
        stats.oldest_remaining = oldest.segments.first().map(|s| s.start_time);
        let newest = self
            .repository
            .list(&ListOptions {
                order_by: OrderBy::EndTime,
                order_desc: true,
                limit: 1,
                ..ListOptions::default()
            })
            .await?;
        stats.newest_remaining = newest.segments.first().map(|s| s.end_time);
        Ok(stats)
    }

    /// Remove one segment: backing file first (failure is a warning), then
    /// the index entry (failure propagates). Returns the bytes freed.
    pub async fn delete_segment(&self, segment: &Segment) -> Result<u64> {
        if let Err(e) = self.inspector.delete(segment).await {
            warn!(
                segment = segment.id,
                file = ?segment.file_path,
                error = %e,
                "failed to remove segment file, dropping index entry anyway"
            );
        }
        self.repository.delete(&segment.id).await?;
        Ok(segment.file_size_bytes)
    }

    /// Transition hot segments older than `older_than` to the warm tier.
    /// Index-level only; physical relocation is an extension point.
    pub async fn migrate_to_warm(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut migrated = 0;
        loop {
            let page = self
                .repository
                .list(&ListOptions {
                    tier: Some(StorageTier::Hot),
                    end_time_max: Some(cutoff),
                    limit: AGE_BATCH,
                    ..ListOptions::default()
                })
                .await?;
            if page.segments.is_empty() {
                break;
            }
            let ids: Vec<String> = page.segments.iter().map(|s| s.id.clone()).collect();
            self.repository.update_tier(&ids, StorageTier::Warm).await?;
            migrated += ids.len();
            if page.segments.len() < AGE_BATCH {
                break;
            }
        }
        if migrated > 0 {
            info!(migrated, "segments migrated to warm tier");
        }
        Ok(migrated)
    }

    /// Age-based cleanup for one camera, batched per event class.
    async fn cleanup_camera(
        &self,
        camera: &CameraConfig,
        retention: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<(u64, u64)> {
        let default_days = camera.retention_days.unwrap_or(retention.default_days);
        let events_days = camera
            .events_retention_days
            .or(retention.events_days)
            .unwrap_or(default_days * 2)
            .max(default_days);
        let default_cutoff = now - chrono::Duration::days(i64::from(default_days));
        let events_cutoff = now - chrono::Duration::days(i64::from(events_days));

        let mut deleted = 0u64;
        let mut freed = 0u64;
        for (has_events, cutoff) in [(false, default_cutoff), (true, events_cutoff)] {
            loop {
                let page = self
                    .repository
                    .list(&ListOptions {
                        camera_id: Some(camera.id.clone()),
                        has_events: Some(has_events),
                        end_time_max: Some(cutoff),
                        order_by: OrderBy::EndTime,
                        limit: AGE_BATCH,
                        ..ListOptions::default()
                    })
                    .await?;
                if page.segments.is_empty() {
                    break;
                }
                let mut progress = false;
                for seg in &page.segments {
                    match self.delete_segment(seg).await {
                        Ok(bytes) => {
                            deleted += 1;
                            freed += bytes;
                            progress = true;
                        }
                        Err(e) => {
                            warn!(segment = seg.id, error = %e, "failed to delete expired segment");
                        }
                    }
                }
                if !progress {
                    break;
                }
            }
        }

        if deleted > 0 {
            info!(camera = camera.id, deleted, freed, "expired segments removed");
        }
        Ok((deleted, freed))
    }

    /// Bring walked on-disk usage back under the byte budget, spreading the
    /// deletions across cameras in proportion to what each one holds.
    async fn enforce_global_cap(&self, cfg: &Config) -> Result<(u64, u64)> {
        let max_bytes = (cfg.storage.max_storage_gb * BYTES_PER_GB) as u64;
        let usage = walk_usage(&cfg.storage.storage_path).await?;
        if usage <= max_bytes {
            return Ok((0, 0));
        }
        let target = (max_bytes as f64 * CAP_TARGET_RATIO) as u64;
        let bytes_to_free = usage - target;
        info!(usage, max_bytes, bytes_to_free, "storage cap exceeded, freeing oldest segments");

        let by_camera = self.repository.get_storage_by_camera().await?;
        let mut deleted = 0u64;
        let mut freed = 0u64;
        for (camera_id, camera_bytes) in by_camera {
            let share = ((camera_bytes as f64 / usage as f64) * bytes_to_free as f64).ceil() as u64;
            if share == 0 {
                continue;
            }
            match self.free_camera_bytes(&camera_id, share).await {
                Ok((d, f)) => {
                    deleted += d;
                    freed += f;
                }
                Err(e) => warn!(camera = camera_id, error = %e, "cap enforcement failed for camera"),
            }
        }
        Ok((deleted, freed))
    }

    /// Delete the oldest segments of one camera until `share` bytes are
    /// freed or nothing deletable remains. Non-event segments go first;
    /// once exhausted the general oldest-first list is used. Every pass
    /// re-queries from offset 0 and the loop breaks when a pass makes no
    /// progress.
    async fn free_camera_bytes(&self, camera_id: &str, share: u64) -> Result<(u64, u64)> {
        let mut deleted = 0u64;
        let mut freed = 0u64;
        'passes: loop {
            let mut batch = self
                .repository
                .list(&ListOptions {
                    camera_id: Some(camera_id.to_string()),
                    has_events: Some(false),
                    limit: CAP_BATCH,
                    ..ListOptions::default()
                })
                .await?
                .segments;
            if batch.is_empty() {
                batch = self.repository.get_oldest_segments(camera_id, CAP_BATCH).await?;
            }
            if batch.is_empty() {
                break;
            }
            let mut progress = false;
            for seg in &batch {
                match self.delete_segment(seg).await {
                    Ok(bytes) => {
                        deleted += 1;
                        freed += bytes;
                        progress = true;
                        if freed >= share {
                            break 'passes;
                        }
                    }
                    Err(e) => {
                        warn!(segment = seg.id, error = %e, "failed to delete segment for cap");
                    }
                }
            }
            if !progress {
                break;
            }
        }
        if deleted > 0 {
            debug!(camera = camera_id, deleted, freed, share, "cap share freed");
        }
        Ok((deleted, freed))
    }
}

/// Total size of all regular files under `root`. Missing directories count
/// as empty.
pub(crate) async fn walk_usage(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().await?.len();
            }
        }
    }
    Ok(total)
}
