//! Per-frame processing: detection, identity tracking, metrics

pub mod detection;
pub mod metrics;
pub mod tracker;

pub use detection::{
    BoundingBox, Detection, DetectionAdapter, MotionSegmenter, Point, ReplaySegmenter,
    SegmenterParams,
};
pub use metrics::{MetricsAggregator, Snapshot, SnapshotRecord};
pub use tracker::{FrameUpdate, IdentityTracker, ObjectId, ObjectState, TrackedObject};
