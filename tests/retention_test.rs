// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Retention controller tests: age windows, event windows, the global
//! storage cap, tier migration, and loop idempotence.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{segment_at, FakeInspector};
use parking_lot::RwLock;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use nvr_core::config::{CameraConfig, Config, RecordRole, RetentionConfig, StorageConfig};
use nvr_core::retention::RetentionManager;
use nvr_core::storage::memory::MemoryRepository;
use nvr_core::storage::repository::{ListOptions, SegmentRepository};
use nvr_core::storage::segment::{Segment, StorageTier};

fn camera(id: &str) -> CameraConfig {
    CameraConfig {
        id: id.into(),
        name: id.into(),
        url: format!("rtsp://10.0.0.2/{id}"),
        substream_url: None,
        username: None,
        password: None,
        record: true,
        record_role: RecordRole::Main,
        retention_days: None,
        events_retention_days: None,
    }
}

fn config(dir: &TempDir, retention: RetentionConfig, max_storage_gb: f64) -> Config {
    Config {
        storage: StorageConfig {
            storage_path: dir.path().join("segments"),
            thumbnail_path: dir.path().join("thumbnails"),
            segment_duration_secs: 10,
            max_storage_gb,
            hwaccel_args: vec![],
        },
        retention,
        cameras: vec![camera("cam1")],
        ffmpeg_path: "ffmpeg".into(),
        ffprobe_path: "ffprobe".into(),
    }
}

struct Harness {
    _dir: TempDir,
    storage_path: PathBuf,
    repo: Arc<MemoryRepository>,
    inspector: Arc<FakeInspector>,
    manager: Arc<RetentionManager>,
}

fn harness(retention: RetentionConfig, max_storage_gb: f64) -> Harness {
    harness_with(vec![camera("cam1")], retention, max_storage_gb)
}

fn harness_with(
    cameras: Vec<CameraConfig>,
    retention: RetentionConfig,
    max_storage_gb: f64,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(&dir, retention, max_storage_gb);
    cfg.cameras = cameras;
    let storage_path = cfg.storage.storage_path.clone();
    let repo = Arc::new(MemoryRepository::new());
    let inspector = Arc::new(FakeInspector::new(
        storage_path.clone(),
        cfg.storage.thumbnail_path.clone(),
        10.0,
    ));
    let manager = Arc::new(RetentionManager::new(
        repo.clone(),
        inspector.clone(),
        Arc::new(RwLock::new(cfg)),
    ));
    Harness { _dir: dir, storage_path, repo, inspector, manager }
}

/// Insert a segment backed by a real file of `size` bytes, aged so that it
/// started `age` before now.
async fn seed_segment(
    h: &Harness,
    camera_id: &str,
    age: chrono::Duration,
    size: usize,
    has_events: bool,
) -> Segment {
    let start = Utc::now() - age;
    let mut seg = segment_at(camera_id, start, 10.0, size as u64);
    seg.has_events = has_events;
    seg.event_count = u32::from(has_events);
    let dir = h.storage_path.join(camera_id);
    tokio::fs::create_dir_all(&dir).await.expect("camera dir");
    seg.file_path = dir.join(format!("{}.mp4", start.timestamp_nanos_opt().unwrap_or(0)));
    tokio::fs::write(&seg.file_path, vec![0xABu8; size]).await.expect("file");
    h.repo.create(seg).await.expect("index")
}

fn disk_usage(root: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let Ok(ft) = entry.file_type() else { continue };
            if ft.is_dir() {
                stack.push(entry.path());
            } else if ft.is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    total
}

#[tokio::test]
async fn age_cleanup_honors_event_window() {
    let h = harness(
        RetentionConfig { default_days: 7, events_days: Some(14), interval_secs: 3600 },
        0.0,
    );

    // One event-bearing segment aged 20 days, five plain ones aged 30 days:
    // all past their windows.
    seed_segment(&h, "cam1", chrono::Duration::days(20), 100, true).await;
    for i in 0..5 {
        seed_segment(&h, "cam1", chrono::Duration::days(30) + chrono::Duration::minutes(i), 100, false)
            .await;
    }

    let stats = h.manager.run_cycle().await.expect("cycle");
    assert_eq!(stats.segments_deleted, 6);
    assert_eq!(stats.bytes_freed, 600);
    assert_eq!(h.repo.get_segment_count("cam1").await.expect("count"), 0);
    assert_eq!(stats.oldest_remaining, None);
    assert_eq!(disk_usage(&h.storage_path), 0);
}

#[tokio::test]
async fn young_segments_survive() {
    let h = harness(
        RetentionConfig { default_days: 7, events_days: Some(14), interval_secs: 3600 },
        0.0,
    );

    // Inside their windows: a 5-day plain segment and a 10-day event
    // segment (past the default window but inside the events window).
    let plain = seed_segment(&h, "cam1", chrono::Duration::days(5), 100, false).await;
    let event = seed_segment(&h, "cam1", chrono::Duration::days(10), 100, true).await;
    // Past the default window.
    seed_segment(&h, "cam1", chrono::Duration::days(8), 100, false).await;

    let stats = h.manager.run_cycle().await.expect("cycle");
    assert_eq!(stats.segments_deleted, 1);
    assert!(h.repo.get(&plain.id).await.is_ok());
    assert!(h.repo.get(&event.id).await.is_ok());
    assert!(stats.oldest_remaining.is_some());
    assert!(stats.newest_remaining.is_some());
}

#[tokio::test]
async fn per_camera_overrides_apply() {
    // Global window of 30 days, but cam1 keeps only 1 day.
    let h = harness_with(
        vec![CameraConfig { retention_days: Some(1), ..camera("cam1") }],
        RetentionConfig { default_days: 30, events_days: None, interval_secs: 3600 },
        0.0,
    );

    seed_segment(&h, "cam1", chrono::Duration::days(2), 100, false).await;
    let stats = h.manager.run_cycle().await.expect("cycle");
    assert_eq!(stats.segments_deleted, 1);
}

#[tokio::test]
async fn global_cap_frees_oldest_first() {
    // Cap of 50 000 bytes, expressed in GB.
    let cap_bytes = 50_000u64;
    let h = harness(
        RetentionConfig { default_days: 365, events_days: None, interval_secs: 3600 },
        cap_bytes as f64 / (1u64 << 30) as f64,
    );

    // Ten 10 000-byte segments, ages 0..9 hours → 100 000 bytes on disk.
    for i in 0..10 {
        seed_segment(&h, "cam1", chrono::Duration::hours(i), 10_000, false).await;
    }
    assert_eq!(disk_usage(&h.storage_path), 100_000);

    let stats = h.manager.run_cycle().await.expect("cycle");
    assert!(stats.segments_deleted >= 1);

    // Usage must come down to the 90 % target, give or take one segment.
    let target = (cap_bytes as f64 * 0.9) as u64;
    assert!(
        disk_usage(&h.storage_path) <= target + 10_000,
        "usage {} above target {}",
        disk_usage(&h.storage_path),
        target
    );

    // The survivors are the youngest.
    let remaining = h
        .repo
        .list(&ListOptions::for_camera("cam1"))
        .await
        .expect("list")
        .segments;
    let youngest_cutoff = Utc::now() - chrono::Duration::hours(4);
    assert!(remaining.iter().all(|s| s.start_time > youngest_cutoff - chrono::Duration::minutes(1)));
}

#[tokio::test]
async fn cap_prefers_non_event_segments() {
    let cap_bytes = 25_000u64;
    let h = harness(
        RetentionConfig { default_days: 365, events_days: None, interval_secs: 3600 },
        cap_bytes as f64 / (1u64 << 30) as f64,
    );

    // The oldest segment carries events; the plain ones should go first.
    let event = seed_segment(&h, "cam1", chrono::Duration::hours(9), 10_000, true).await;
    for i in 0..3 {
        seed_segment(&h, "cam1", chrono::Duration::hours(i), 10_000, false).await;
    }

    h.manager.run_cycle().await.expect("cycle");
    assert!(
        h.repo.get(&event.id).await.is_ok(),
        "event segment deleted before plain ones were exhausted"
    );
}

#[tokio::test]
async fn index_entry_dropped_even_when_file_delete_fails() {
    let h = harness(
        RetentionConfig { default_days: 7, events_days: None, interval_secs: 3600 },
        0.0,
    );
    let seg = seed_segment(&h, "cam1", chrono::Duration::days(30), 100, false).await;

    h.inspector.fail_deletes.store(true, Ordering::SeqCst);
    let stats = h.manager.run_cycle().await.expect("cycle");
    assert_eq!(stats.segments_deleted, 1);
    assert!(h.repo.get(&seg.id).await.is_err());
    // The file survives; the next cycle with a healthy inspector would not
    // see it in the index, which is the documented cap-walk divergence.
    assert!(seg.file_path.exists());
}

#[tokio::test]
async fn migrate_to_warm_transitions_old_hot_segments() {
    let h = harness(
        RetentionConfig { default_days: 365, events_days: None, interval_secs: 3600 },
        0.0,
    );
    let old_a = seed_segment(&h, "cam1", chrono::Duration::days(3), 100, false).await;
    let old_b = seed_segment(&h, "cam1", chrono::Duration::days(2), 100, false).await;
    let young = seed_segment(&h, "cam1", chrono::Duration::hours(1), 100, false).await;

    let migrated = h
        .manager
        .migrate_to_warm(chrono::Duration::days(1))
        .await
        .expect("migrate");
    assert_eq!(migrated, 2);
    assert_eq!(h.repo.get(&old_a.id).await.expect("a").storage_tier, StorageTier::Warm);
    assert_eq!(h.repo.get(&old_b.id).await.expect("b").storage_tier, StorageTier::Warm);
    assert_eq!(h.repo.get(&young.id).await.expect("c").storage_tier, StorageTier::Hot);

    // Second run finds nothing hot and old.
    let migrated = h
        .manager
        .migrate_to_warm(chrono::Duration::days(1))
        .await
        .expect("migrate again");
    assert_eq!(migrated, 0);
}

#[tokio::test]
async fn loop_start_stop_idempotent() {
    let h = harness(
        RetentionConfig { default_days: 7, events_days: None, interval_secs: 3600 },
        0.0,
    );
    seed_segment(&h, "cam1", chrono::Duration::days(30), 100, false).await;

    let parent = CancellationToken::new();
    h.manager.start(&parent, Duration::from_secs(3600));
    h.manager.start(&parent, Duration::from_secs(3600)); // no-op

    // The first cycle runs immediately.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if h.repo.get_segment_count("cam1").await.expect("count") == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "immediate cycle never ran");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    h.manager.stop();
    h.manager.stop(); // no-op
}

/// Expired timestamp helper sanity: seeded files really live on disk.
#[tokio::test]
async fn seeded_files_exist() {
    let h = harness(RetentionConfig::default(), 0.0);
    let seg = seed_segment(&h, "cam1", chrono::Duration::hours(1), 123, false).await;
    assert!(seg.file_path.exists());
    let now: DateTime<Utc> = Utc::now();
    assert!(seg.start_time < now);
}
