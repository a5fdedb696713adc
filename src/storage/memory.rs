// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! In-memory segment repository.
//!
//! The reference [`SegmentRepository`] implementation: a process-local map
//! guarded by a read-write lock. Queries filter linearly — segment counts
//! per NVR are bounded by retention, so a scan is cheap and keeps the
//! implementation obviously correct. A database-backed engine can replace
//! this behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{NvrError, Result};
use crate::storage::repository::{ListOptions, OrderBy, SegmentPage, SegmentRepository};
use crate::storage::segment::{Segment, StorageTier};

/// Process-local segment index.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<HashMap<String, Segment>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(seg: &Segment, options: &ListOptions) -> bool {
        if let Some(cam) = &options.camera_id {
            if &seg.camera_id != cam {
                return false;
            }
        }
        if let Some(min) = options.start_time_min {
            if seg.start_time < min {
                return false;
            }
        }
        if let Some(max) = options.end_time_max {
            if seg.end_time >= max {
                return false;
            }
        }
        if let Some(has_events) = options.has_events {
            if seg.has_events != has_events {
                return false;
            }
        }
        if let Some(tier) = options.tier {
            if seg.storage_tier != tier {
                return false;
            }
        }
        true
    }

    fn sort(segments: &mut [Segment], order_by: OrderBy, desc: bool) {
        segments.sort_by(|a, b| {
            let ord = match order_by {
                OrderBy::StartTime => a.start_time.cmp(&b.start_time),
                OrderBy::EndTime => a.end_time.cmp(&b.end_time),
                OrderBy::FileSize => a.file_size_bytes.cmp(&b.file_size_bytes),
                OrderBy::Duration => a
                    .duration_seconds
                    .partial_cmp(&b.duration_seconds)
                    .unwrap_or(std::cmp::Ordering::Equal),
            };
            // Tie-break on id so pagination is stable.
            let ord = ord.then_with(|| a.id.cmp(&b.id));
            if desc { ord.reverse() } else { ord }
        });
    }
}

#[async_trait]
impl SegmentRepository for MemoryRepository {
    async fn create(&self, mut segment: Segment) -> Result<Segment> {
        segment.validate()?;
        let mut inner = self.inner.write();
        if segment.id.is_empty() {
            segment.id = Uuid::new_v4().to_string();
        } else if inner.contains_key(&segment.id) {
            return Err(NvrError::AlreadyExists {
                what: format!("segment '{}'", segment.id),
            });
        }
        if inner.values().any(|s| s.file_path == segment.file_path) {
            return Err(NvrError::AlreadyExists {
                what: format!("segment file {:?}", segment.file_path),
            });
        }
        let now = Utc::now();
        segment.created_at = now;
        segment.updated_at = now;
        inner.insert(segment.id.clone(), segment.clone());
        Ok(segment)
    }

    async fn get(&self, id: &str) -> Result<Segment> {
        self.inner
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| NvrError::segment_not_found(id))
    }

    async fn update(&self, mut segment: Segment) -> Result<Segment> {
        segment.validate()?;
        let mut inner = self.inner.write();
        let existing = inner
            .get(&segment.id)
            .ok_or_else(|| NvrError::segment_not_found(&segment.id))?;
        if inner
            .values()
            .any(|s| s.id != segment.id && s.file_path == segment.file_path)
        {
            return Err(NvrError::AlreadyExists {
                what: format!("segment file {:?}", segment.file_path),
            });
        }
        segment.created_at = existing.created_at;
        segment.updated_at = Utc::now();
        inner.insert(segment.id.clone(), segment.clone());
        Ok(segment)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.inner
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| NvrError::segment_not_found(id))
    }

    async fn list(&self, options: &ListOptions) -> Result<SegmentPage> {
        let inner = self.inner.read();
        let mut matched: Vec<Segment> = inner
            .values()
            .filter(|s| Self::matches(s, options))
            .cloned()
            .collect();
        let total = matched.len();
        if options.limit == 0 {
            return Ok(SegmentPage { segments: Vec::new(), total });
        }
        Self::sort(&mut matched, options.order_by, options.order_desc);
        let segments = matched
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .collect();
        Ok(SegmentPage { segments, total })
    }

    async fn delete_before(&self, camera_id: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, s| !(s.camera_id == camera_id && s.end_time < cutoff));
        Ok(before - inner.len())
    }

    async fn update_tier(&self, ids: &[String], tier: StorageTier) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write();
        let now = Utc::now();
        for id in ids {
            if let Some(seg) = inner.get_mut(id) {
                seg.storage_tier = tier;
                seg.updated_at = now;
            }
        }
        Ok(())
    }

    async fn get_by_time_range(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Segment>> {
        let inner = self.inner.read();
        let mut segments: Vec<Segment> = inner
            .values()
            .filter(|s| s.camera_id == camera_id && s.start_time < end && s.end_time > start)
            .cloned()
            .collect();
        segments.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(segments)
    }

    async fn get_oldest_segments(&self, camera_id: &str, limit: usize) -> Result<Vec<Segment>> {
        let inner = self.inner.read();
        let mut segments: Vec<Segment> = inner
            .values()
            .filter(|s| s.camera_id == camera_id)
            .cloned()
            .collect();
        segments.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        segments.truncate(limit);
        Ok(segments)
    }

    async fn get_total_size(&self, camera_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .values()
            .filter(|s| s.camera_id == camera_id)
            .map(|s| s.file_size_bytes)
            .sum())
    }

    async fn get_segment_count(&self, camera_id: &str) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .values()
            .filter(|s| s.camera_id == camera_id)
            .count() as u64)
    }

    async fn get_storage_by_camera(&self) -> Result<HashMap<String, u64>> {
        let inner = self.inner.read();
        let mut by_camera: HashMap<String, u64> = HashMap::new();
        for seg in inner.values() {
            *by_camera.entry(seg.camera_id.clone()).or_insert(0) += seg.file_size_bytes;
        }
        Ok(by_camera)
    }

    async fn get_storage_by_tier(&self) -> Result<HashMap<StorageTier, u64>> {
        let inner = self.inner.read();
        let mut by_tier: HashMap<StorageTier, u64> = HashMap::new();
        for seg in inner.values() {
            *by_tier.entry(seg.storage_tier).or_insert(0) += seg.file_size_bytes;
        }
        Ok(by_tier)
    }
}
