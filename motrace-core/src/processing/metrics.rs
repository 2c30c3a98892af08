//! Metrics aggregation
//!
//! Converts Visible objects into physical units and emits a [`Snapshot`]
//! every `snapshot_stride` processed frames.

use crate::config::MetricsConfig;
use crate::processing::detection::Point;
use crate::processing::tracker::{FrameUpdate, IdentityTracker, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// One object's row in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub frame: u64,
    pub x_mm: f64,
    pub y_mm: f64,
    pub displacement_mm: f64,
    pub average_velocity_mm_s: f64,
    pub size_mm: f64,
}

/// Metrics for every reportable Visible object at one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub frame_index: u64,
    /// Time spent processing the emitting frame
    pub processing_latency: Duration,
    pub records: BTreeMap<ObjectId, SnapshotRecord>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct MetricsAggregator {
    scale: f64,
    stride: u64,
    processed: u64,
    /// Position at the last emission, per object
    last_recorded: HashMap<ObjectId, Point>,
}

impl MetricsAggregator {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            scale: config.pixel_to_mm,
            stride: u64::from(config.snapshot_stride.max(1)),
            processed: 0,
            last_recorded: HashMap::new(),
        }
    }

    /// Called once per processed frame, after the tracker update.
    ///
    /// Returns a snapshot on emission frames (the first processed frame and
    /// every `stride`-th one after it). Objects whose average velocity is
    /// exactly zero are left out of the snapshot, but their position still
    /// becomes the reference for the next displacement.
    pub fn aggregate(
        &mut self,
        frame_index: u64,
        tracker: &IdentityTracker,
        update: &FrameUpdate,
        latency: Duration,
    ) -> Option<Snapshot> {
        for id in &update.evicted {
            self.last_recorded.remove(id);
        }

        let emit = self.processed % self.stride == 0;
        self.processed += 1;
        if !emit {
            return None;
        }

        let mut records = BTreeMap::new();
        for obj in tracker.visible_objects() {
            let previous = self
                .last_recorded
                .insert(obj.id, obj.centroid)
                .unwrap_or(obj.centroid);
            let displacement_mm = previous.distance(&obj.centroid) * self.scale;
            let average_velocity_mm_s = obj.average_velocity() * self.scale;

            if average_velocity_mm_s == 0.0 {
                continue;
            }

            records.insert(
                obj.id,
                SnapshotRecord {
                    frame: frame_index,
                    x_mm: obj.centroid.x * self.scale,
                    y_mm: obj.centroid.y * self.scale,
                    displacement_mm,
                    average_velocity_mm_s,
                    size_mm: obj.size_px * self.scale,
                },
            );
        }

        Some(Snapshot {
            frame_index,
            processing_latency: latency,
            records,
        })
    }

    /// Frames seen so far
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::processing::detection::{BoundingBox, Detection};

    fn tracker() -> IdentityTracker {
        IdentityTracker::new(&TrackerConfig {
            match_distance_px: 50.0,
            appearance_debounce_secs: 0.0,
            disappearance_timeout_secs: 5.0,
        })
    }

    fn metrics(stride: u32) -> MetricsAggregator {
        MetricsAggregator::new(&MetricsConfig {
            pixel_to_mm: 0.1,
            snapshot_stride: stride,
        })
    }

    fn det(cx: i32, cy: i32) -> Detection {
        Detection::new(BoundingBox::centered(cx, cy, 40, 40), 0, 0.0)
    }

    #[test]
    fn test_stride_cadence() {
        let mut tracker = tracker();
        let mut agg = metrics(5);
        let mut emitted = Vec::new();
        for i in 0..11u64 {
            let update = tracker.update(i as f64, &[]).unwrap();
            if agg.aggregate(i, &tracker, &update, Duration::ZERO).is_some() {
                emitted.push(i);
            }
        }
        assert_eq!(emitted, vec![0, 5, 10]);
        assert_eq!(agg.processed(), 11);
    }

    #[test]
    fn test_zero_velocity_suppressed_but_position_recorded() {
        let mut tracker = tracker();
        let mut agg = metrics(1);

        let update = tracker.update(0.0, &[det(100, 100)]).unwrap();
        let snap = agg.aggregate(0, &tracker, &update, Duration::ZERO).unwrap();
        assert!(snap.is_empty());

        let update = tracker.update(1.0, &[det(110, 100)]).unwrap();
        let snap = agg.aggregate(1, &tracker, &update, Duration::ZERO).unwrap();
        let record = snap.records[&ObjectId::new(1)];
        assert!((record.displacement_mm - 1.0).abs() < 1e-9);
        assert!((record.average_velocity_mm_s - 1.0).abs() < 1e-9);
        assert!((record.x_mm - 11.0).abs() < 1e-9);
        assert!((record.size_mm - 160.0).abs() < 1e-9);
        assert_eq!(record.frame, 1);
    }

    #[test]
    fn test_displacement_spans_skipped_frames() {
        let mut tracker = tracker();
        let mut agg = metrics(2);

        let u = tracker.update(0.0, &[det(100, 100)]).unwrap();
        agg.aggregate(0, &tracker, &u, Duration::ZERO);
        let u = tracker.update(1.0, &[det(110, 100)]).unwrap();
        assert!(agg.aggregate(1, &tracker, &u, Duration::ZERO).is_none());
        let u = tracker.update(2.0, &[det(130, 100)]).unwrap();
        let snap = agg.aggregate(2, &tracker, &u, Duration::ZERO).unwrap();

        let record = snap.records[&ObjectId::new(1)];
        assert!((record.displacement_mm - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_pending_objects_not_reported() {
        let mut tracker = IdentityTracker::new(&TrackerConfig {
            match_distance_px: 50.0,
            appearance_debounce_secs: 1.0,
            disappearance_timeout_secs: 5.0,
        });
        let mut agg = metrics(1);
        tracker.update(0.0, &[det(100, 100)]).unwrap();
        let u = tracker.update(0.5, &[det(110, 100)]).unwrap();
        let snap = agg.aggregate(1, &tracker, &u, Duration::ZERO).unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn test_latency_carried() {
        let tracker = tracker();
        let mut agg = metrics(1);
        let snap = agg
            .aggregate(7, &tracker, &FrameUpdate::default(), Duration::from_millis(3))
            .unwrap();
        assert_eq!(snap.frame_index, 7);
        assert_eq!(snap.processing_latency, Duration::from_millis(3));
    }
}
