// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Timeline assembler — derives the gap/recording view from the segment
//! index.
//!
//! The assembler never mutates anything: it sweeps repository query results
//! into a sequence of non-overlapping timeline segments whose union covers
//! the requested window exactly. Contiguous recordings coalesce, so two
//! adjacent `recording` entries never abut.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{NvrError, Result};
use crate::storage::repository::SegmentRepository;
use crate::storage::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineSegmentKind {
    Recording,
    Gap,
}

/// One span of the derived timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSegment {
    #[serde(rename = "type")]
    pub kind: TimelineSegmentKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub has_events: bool,
    pub event_count: u32,
    /// Contributing segment ids; empty for gaps.
    pub segment_ids: Vec<String>,
}

impl TimelineSegment {
    fn gap(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            kind: TimelineSegmentKind::Gap,
            start_time,
            end_time,
            has_events: false,
            event_count: 0,
            segment_ids: Vec::new(),
        }
    }
}

/// Derived view over one camera (or `"all"` when merged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub camera_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub segments: Vec<TimelineSegment>,
    pub total_size_bytes: u64,
    pub total_hours: f64,
}

/// Aggregates for one 24-hour window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub segment_count: u64,
    pub total_duration_seconds: f64,
    pub total_size_bytes: u64,
    pub event_count: u64,
    pub coverage_percent: f64,
}

/// Derives user-facing timelines from the segment repository.
pub struct TimelineAssembler {
    repository: Arc<dyn SegmentRepository>,
}

impl TimelineAssembler {
    pub fn new(repository: Arc<dyn SegmentRepository>) -> Self {
        Self { repository }
    }

    /// Build the gap/recording segmentation of `[start, end]` for a camera.
    pub async fn build_timeline(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Timeline> {
        let mut timeline = Timeline {
            camera_id: camera_id.to_string(),
            start_time: start,
            end_time: end,
            segments: Vec::new(),
            total_size_bytes: 0,
            total_hours: 0.0,
        };
        if end <= start {
            return Ok(timeline);
        }

        let segments = self.repository.get_by_time_range(camera_id, start, end).await?;

        let mut cursor = start;
        let mut total_duration = 0.0;
        for seg in &segments {
            let clip_start = seg.start_time.max(start);
            let clip_end = seg.end_time.min(end);
            if clip_end <= clip_start {
                continue;
            }

            if cursor < clip_start {
                timeline.segments.push(TimelineSegment::gap(cursor, clip_start));
            }

            match timeline.segments.last_mut() {
                // Contiguous or overlapping recordings coalesce.
                Some(last)
                    if last.kind == TimelineSegmentKind::Recording
                        && last.end_time >= clip_start =>
                {
                    last.end_time = last.end_time.max(clip_end);
                    last.has_events |= seg.has_events;
                    last.event_count += seg.event_count;
                    last.segment_ids.push(seg.id.clone());
                }
                _ => {
                    timeline.segments.push(TimelineSegment {
                        kind: TimelineSegmentKind::Recording,
                        start_time: clip_start,
                        end_time: clip_end,
                        has_events: seg.has_events,
                        event_count: seg.event_count,
                        segment_ids: vec![seg.id.clone()],
                    });
                }
            }

            cursor = cursor.max(clip_end);
            timeline.total_size_bytes += seg.file_size_bytes;
            total_duration += seg.duration_seconds;
        }

        if cursor < end {
            timeline.segments.push(TimelineSegment::gap(cursor, end));
        }

        timeline.total_hours = total_duration / 3600.0;
        Ok(timeline)
    }

    /// Percentage of `[start, end]` covered by recordings. 0 for an empty
    /// window.
    pub async fn get_coverage(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let window_ms = (end - start).num_milliseconds();
        if window_ms <= 0 {
            return Ok(0.0);
        }
        let timeline = self.build_timeline(camera_id, start, end).await?;
        let covered_ms: i64 = timeline
            .segments
            .iter()
            .filter(|s| s.kind == TimelineSegmentKind::Recording)
            .map(|s| (s.end_time - s.start_time).num_milliseconds())
            .sum();
        Ok((covered_ms as f64 / window_ms as f64 * 100.0).clamp(0.0, 100.0))
    }

    /// Recording spans of the window that carry events.
    pub async fn get_event_timeline(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineSegment>> {
        let timeline = self.build_timeline(camera_id, start, end).await?;
        Ok(timeline
            .segments
            .into_iter()
            .filter(|s| s.kind == TimelineSegmentKind::Recording && s.has_events)
            .collect())
    }

    /// Segments whose `[start_time, end_time]` contains `instant`.
    pub async fn find_segments_containing(
        &self,
        camera_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<Vec<Segment>> {
        // Any segment containing the instant overlaps this probe window.
        let probe = Duration::minutes(1);
        let candidates = self
            .repository
            .get_by_time_range(camera_id, instant - probe, instant + probe)
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|s| s.start_time <= instant && instant <= s.end_time)
            .collect())
    }

    /// Playback entry point: the file containing `instant` plus the offset
    /// into it, in seconds.
    pub async fn get_playback_url(
        &self,
        camera_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<(PathBuf, f64)> {
        let segments = self.find_segments_containing(camera_id, instant).await?;
        let seg = segments.into_iter().next().ok_or_else(|| NvrError::NotFound {
            what: format!("segment containing {instant} for camera '{camera_id}'"),
        })?;
        let offset = (instant - seg.start_time).num_milliseconds() as f64 / 1000.0;
        Ok((seg.file_path, offset))
    }

    /// Aggregates for the 24-hour window starting at midnight UTC of `date`.
    pub async fn get_daily_stats(&self, camera_id: &str, date: NaiveDate) -> Result<DailyStats> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);
        let segments = self.repository.get_by_time_range(camera_id, start, end).await?;

        let total_duration_seconds: f64 = segments.iter().map(|s| s.duration_seconds).sum();
        Ok(DailyStats {
            date,
            segment_count: segments.len() as u64,
            total_duration_seconds,
            total_size_bytes: segments.iter().map(|s| s.file_size_bytes).sum(),
            event_count: segments.iter().map(|s| u64::from(s.event_count)).sum(),
            coverage_percent: (total_duration_seconds / 86_400.0 * 100.0).clamp(0.0, 100.0),
        })
    }

    /// Seven consecutive daily windows starting at `week_start`.
    pub async fn get_weekly_stats(
        &self,
        camera_id: &str,
        week_start: NaiveDate,
    ) -> Result<Vec<DailyStats>> {
        let mut days = Vec::with_capacity(7);
        for offset in 0..7 {
            let date = week_start + Duration::days(offset);
            days.push(self.get_daily_stats(camera_id, date).await?);
        }
        Ok(days)
    }
}

/// Merge per-camera timelines into one cross-camera view (`camera_id =
/// "all"`). Recording spans union via a boundary sweep; the result is
/// independent of input order.
pub fn merge_timelines(timelines: &[Timeline]) -> Timeline {
    let mut merged = Timeline {
        camera_id: "all".to_string(),
        start_time: DateTime::<Utc>::UNIX_EPOCH,
        end_time: DateTime::<Utc>::UNIX_EPOCH,
        segments: Vec::new(),
        total_size_bytes: 0,
        total_hours: 0.0,
    };
    let Some(min_start) = timelines.iter().map(|t| t.start_time).min() else {
        return merged;
    };
    let max_end = timelines
        .iter()
        .map(|t| t.end_time)
        .max()
        .unwrap_or(min_start);
    merged.start_time = min_start;
    merged.end_time = max_end;
    merged.total_size_bytes = timelines.iter().map(|t| t.total_size_bytes).sum();
    merged.total_hours = timelines.iter().map(|t| t.total_hours).sum();

    // Boundary events: +1 at each recording start, -1 at each end.
    let mut boundaries: Vec<(DateTime<Utc>, i8, &TimelineSegment)> = Vec::new();
    for timeline in timelines {
        for seg in &timeline.segments {
            if seg.kind == TimelineSegmentKind::Recording {
                boundaries.push((seg.start_time, 1, seg));
                boundaries.push((seg.end_time, -1, seg));
            }
        }
    }
    // Opens before closes at the same instant, so touching spans coalesce.
    boundaries.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut active = 0u32;
    let mut cursor = min_start;
    let mut run_start = min_start;
    let mut run_events = false;
    let mut run_count = 0u32;
    let mut run_ids: Vec<String> = Vec::new();

    for (time, delta, seg) in boundaries {
        if delta > 0 {
            if active == 0 {
                if cursor < time {
                    merged.segments.push(TimelineSegment::gap(cursor, time));
                }
                run_start = time;
                run_events = false;
                run_count = 0;
                run_ids.clear();
            }
            run_events |= seg.has_events;
            run_count += seg.event_count;
            run_ids.extend(seg.segment_ids.iter().cloned());
            active += 1;
        } else {
            active = active.saturating_sub(1);
            if active == 0 {
                run_ids.sort();
                run_ids.dedup();
                merged.segments.push(TimelineSegment {
                    kind: TimelineSegmentKind::Recording,
                    start_time: run_start,
                    end_time: time,
                    has_events: run_events,
                    event_count: run_count,
                    segment_ids: std::mem::take(&mut run_ids),
                });
                cursor = time;
            }
        }
    }

    if cursor < max_end {
        merged.segments.push(TimelineSegment::gap(cursor, max_end));
    }
    merged
}
