//! motrace-core: streaming multi-object motion tracking
//!
//! Turns a stream of video frames into stable object identities and a time
//! series of position, displacement, and velocity per object.
//!
//! The pipeline is made of three long-lived tasks joined by bounded queues:
//! - a producer pulling frames from a [`FrameSource`] into the frame channel
//! - a consumer running detection, identity tracking, and metrics aggregation
//! - a sink drain delivering [`Snapshot`]s to a [`Sink`]
//!
//! Video decoding and motion segmentation are external collaborators and are
//! plugged in through [`FrameSource`] and [`MotionSegmenter`].

pub mod channel;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod sink;
pub mod source;

pub use channel::{frame_channel, FrameReceiver, FrameSender, Pop};
pub use config::{
    ChannelConfig, MetricsConfig, OverflowPolicy, SegmenterConfig, SinkConfig, TrackerConfig,
    TrackingConfig,
};
pub use error::{Result, TrackingError};
pub use pipeline::{CancellationFlag, PipelineSession, RunSummary};
pub use processing::{
    BoundingBox, Detection, DetectionAdapter, FrameUpdate, IdentityTracker, MetricsAggregator,
    MotionSegmenter, ObjectId, ObjectState, Point, ReplaySegmenter, SegmenterParams, Snapshot,
    SnapshotRecord, TrackedObject,
};
pub use sink::{
    trajectory_file_name, FanoutSink, JsonFileSink, LogSink, MemorySink, Sink, TrajectoryLog,
    TrajectoryPoint,
};
pub use source::{Frame, FrameSource, RecordedFrame, ReplaySource};
