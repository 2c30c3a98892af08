//! Motion detection boundary
//!
//! The segmenter itself (background subtraction, morphology, contour
//! extraction) lives outside this crate. [`DetectionAdapter`] calls it once per
//! frame and turns its boxes into area-filtered [`Detection`]s.

use crate::source::Frame;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned bounding box, serialized as `[x, y, w, h]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Box of size `w`×`h` whose centre is (`cx`, `cy`)
    pub fn centered(cx: i32, cy: i32, w: i32, h: i32) -> Self {
        Self::new(cx - w / 2, cy - h / 2, w, h)
    }

    pub fn centroid(&self) -> Point {
        Point::new(
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }

    /// Area in px²
    pub fn area(&self) -> f64 {
        self.w as f64 * self.h as f64
    }

    /// Zero or negative width/height
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// One moving region in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub centroid: Point,
    /// px²
    pub area: f64,
    pub frame_index: u64,
    /// Seconds since stream start
    pub timestamp: f64,
}

impl Detection {
    pub fn new(bbox: BoundingBox, frame_index: u64, timestamp: f64) -> Self {
        Self {
            bbox,
            centroid: bbox.centroid(),
            area: bbox.area(),
            frame_index,
            timestamp,
        }
    }
}

/// Segmenter parameters, forwarded untouched on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterParams {
    pub history_length: u32,
    pub variance_threshold: u32,
}

/// External motion segmenter.
///
/// Implementations may keep any internal state (a running background model,
/// for instance); the tracker never sees it.
pub trait MotionSegmenter<P>: Send {
    fn segment(&mut self, frame: &Frame<P>, params: &SegmenterParams) -> Vec<BoundingBox>;
}

/// Segmenter for frames whose payload already holds the segmented boxes
/// (recorded detection streams)
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaySegmenter;

impl MotionSegmenter<Vec<BoundingBox>> for ReplaySegmenter {
    fn segment(&mut self, frame: &Frame<Vec<BoundingBox>>, _params: &SegmenterParams) -> Vec<BoundingBox> {
        frame.payload.clone()
    }
}

/// Wraps a segmenter and applies the minimum-area filter
pub struct DetectionAdapter<S> {
    segmenter: S,
    params: SegmenterParams,
    min_area: f64,
}

impl<S> DetectionAdapter<S> {
    pub fn new(segmenter: S, params: SegmenterParams, min_area: f64) -> Self {
        Self {
            segmenter,
            params,
            min_area,
        }
    }

    /// Run the segmenter on one frame.
    ///
    /// Degenerate boxes are discarded silently. Boxes whose area does not
    /// exceed the minimum are filtered out.
    pub fn detect<P>(&mut self, frame: &Frame<P>) -> Vec<Detection>
    where
        S: MotionSegmenter<P>,
    {
        let boxes = self.segmenter.segment(frame, &self.params);
        let total = boxes.len();

        let detections: Vec<Detection> = boxes
            .into_iter()
            .filter(|b| !b.is_degenerate() && b.area() > self.min_area)
            .map(|b| Detection::new(b, frame.index, frame.timestamp))
            .collect();

        debug!(
            "Frame {}: {} regions, {} above {} px²",
            frame.index,
            total,
            detections.len(),
            self.min_area
        );
        detections
    }
}
