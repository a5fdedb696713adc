// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Repository seam — the authoritative index of recorded segments.
//!
//! Concrete storage engines implement [`SegmentRepository`]; the crate ships
//! the in-memory reference implementation in [`crate::storage::memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::segment::{Segment, StorageTier};

/// Sort key for [`ListOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    StartTime,
    EndTime,
    FileSize,
    Duration,
}

/// Filter, ordering, and pagination for [`SegmentRepository::list`].
///
/// Time bounds are half-open: `start_time_min` is inclusive
/// (`start_time >= min`), `end_time_max` exclusive (`end_time < max`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOptions {
    pub camera_id: Option<String>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub end_time_max: Option<DateTime<Utc>>,
    pub has_events: Option<bool>,
    pub tier: Option<StorageTier>,
    pub order_by: OrderBy,
    pub order_desc: bool,
    /// Page size. 0 returns the total count with an empty page.
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            camera_id: None,
            start_time_min: None,
            end_time_max: None,
            has_events: None,
            tier: None,
            order_by: OrderBy::StartTime,
            order_desc: false,
            limit: 50,
            offset: 0,
        }
    }
}

impl ListOptions {
    /// All segments of one camera, oldest first.
    pub fn for_camera(camera_id: &str) -> Self {
        Self { camera_id: Some(camera_id.to_string()), ..Self::default() }
    }
}

/// One page of a [`SegmentRepository::list`] result.
#[derive(Debug, Clone, Default)]
pub struct SegmentPage {
    pub segments: Vec<Segment>,
    /// Total number of rows matching the filters, ignoring pagination.
    pub total: usize,
}

/// Aggregate view of indexed storage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub segment_count: u64,
    pub by_camera: HashMap<String, u64>,
    pub by_tier: HashMap<StorageTier, u64>,
}

/// Authoritative, consistent index of all recorded segments.
///
/// Implementations surface storage failures as `Io` without retrying;
/// violated invariants map to `InvalidArgument`, missing rows to `NotFound`.
#[async_trait]
pub trait SegmentRepository: Send + Sync {
    /// Insert a segment. Assigns `id` when empty and stamps
    /// `created_at = updated_at = now`. Returns the stored record.
    async fn create(&self, segment: Segment) -> Result<Segment>;

    async fn get(&self, id: &str) -> Result<Segment>;

    /// Replace an existing record, refreshing `updated_at`.
    async fn update(&self, segment: Segment) -> Result<Segment>;

    /// Remove the index entry only. The backing file is untouched.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn list(&self, options: &ListOptions) -> Result<SegmentPage>;

    /// Delete every segment of `camera_id` with `end_time < cutoff`.
    /// Returns the number of rows removed.
    async fn delete_before(&self, camera_id: &str, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Set `storage_tier` on every listed id in one transactional step.
    /// No-op on an empty id list.
    async fn update_tier(&self, ids: &[String], tier: StorageTier) -> Result<()>;

    /// Segments overlapping `[start, end)`: `start_time < end AND
    /// end_time > start`, ordered by `start_time` ascending. A segment
    /// touching only a boundary is excluded.
    async fn get_by_time_range(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Segment>>;

    /// Oldest segments of a camera by `start_time` ascending.
    async fn get_oldest_segments(&self, camera_id: &str, limit: usize) -> Result<Vec<Segment>>;

    async fn get_total_size(&self, camera_id: &str) -> Result<u64>;

    async fn get_segment_count(&self, camera_id: &str) -> Result<u64>;

    /// Bytes indexed per camera. Cameras without rows are simply absent.
    async fn get_storage_by_camera(&self) -> Result<HashMap<String, u64>>;

    /// Bytes indexed per storage tier.
    async fn get_storage_by_tier(&self) -> Result<HashMap<StorageTier, u64>>;
}
