//! Frame acquisition
//!
//! Decoding lives behind [`FrameSource`]. [`ReplaySource`] replays a recorded
//! detection stream (one JSON object per line) so runs are reproducible
//! without a video decoder.

use crate::error::{Result, TrackingError};
use crate::processing::BoundingBox;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<P> {
    /// Position in the source stream
    pub index: u64,
    /// Seconds since stream start
    pub timestamp: f64,
    pub payload: P,
}

impl<P> Frame<P> {
    pub fn new(index: u64, timestamp: f64, payload: P) -> Self {
        Self {
            index,
            timestamp,
            payload,
        }
    }
}

/// Pull-based frame source.
///
/// `next_frame` returning `Ok(None)` means the source is exhausted, which is
/// a normal end of run. Terminal errors end the run; any other error skips
/// the read and the pipeline keeps pulling.
#[async_trait]
pub trait FrameSource: Send {
    type Payload: Send + 'static;

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame<Self::Payload>>>;

    /// Release the underlying device or file
    async fn close(&mut self) {}
}

/// One line of a recorded detection stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
}

impl RecordedFrame {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            index: None,
            timestamp: None,
            boxes,
        }
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

enum Origin {
    File {
        path: PathBuf,
        lines: Option<Lines<BufReader<File>>>,
        line_no: usize,
    },
    Memory(VecDeque<RecordedFrame>),
}

/// Replays recorded boxes as frames whose payload is the box list
pub struct ReplaySource {
    origin: Origin,
    fps: f64,
    position: u64,
}

impl ReplaySource {
    /// Read a JSON-lines file; frames without a timestamp get `index / fps`
    pub fn from_file(path: impl AsRef<Path>, fps: f64) -> Self {
        Self {
            origin: Origin::File {
                path: path.as_ref().to_path_buf(),
                lines: None,
                line_no: 0,
            },
            fps,
            position: 0,
        }
    }

    pub fn from_frames(frames: Vec<RecordedFrame>, fps: f64) -> Self {
        Self {
            origin: Origin::Memory(frames.into()),
            fps,
            position: 0,
        }
    }

    fn stamp(&mut self, recorded: RecordedFrame) -> Frame<Vec<BoundingBox>> {
        let index = recorded.index.unwrap_or(self.position);
        let timestamp = recorded
            .timestamp
            .unwrap_or_else(|| index as f64 / self.fps);
        self.position += 1;
        Frame::new(index, timestamp, recorded.boxes)
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    type Payload = Vec<BoundingBox>;

    async fn open(&mut self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(TrackingError::SourceUnavailable(format!(
                "invalid frame rate {}",
                self.fps
            )));
        }

        if let Origin::File { path, lines, .. } = &mut self.origin {
            let file = File::open(&*path).await.map_err(|e| {
                TrackingError::SourceUnavailable(format!("{}: {}", path.display(), e))
            })?;
            *lines = Some(BufReader::new(file).lines());
            info!("Opened detection stream {}", path.display());
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame<Vec<BoundingBox>>>> {
        let recorded = match &mut self.origin {
            Origin::Memory(frames) => frames.pop_front(),
            Origin::File {
                path,
                lines,
                line_no,
            } => {
                let reader = lines.as_mut().ok_or_else(|| {
                    TrackingError::SourceUnavailable(format!("{} is not open", path.display()))
                })?;
                loop {
                    let line = reader.next_line().await.map_err(|e| {
                        TrackingError::SourceUnavailable(format!("{}: {}", path.display(), e))
                    })?;
                    *line_no += 1;
                    match line {
                        None => break None,
                        Some(l) if l.trim().is_empty() => continue,
                        Some(l) => {
                            let parsed = serde_json::from_str::<RecordedFrame>(&l).map_err(|e| {
                                TrackingError::SourceUnavailable(format!(
                                    "{}:{}: {}",
                                    path.display(),
                                    line_no,
                                    e
                                ))
                            })?;
                            break Some(parsed);
                        }
                    }
                }
            }
        };

        Ok(recorded.map(|r| self.stamp(r)))
    }

    async fn close(&mut self) {
        if let Origin::File { lines, path, .. } = &mut self.origin {
            if lines.take().is_some() {
                debug!("Closed detection stream {}", path.display());
            }
        }
    }
}
