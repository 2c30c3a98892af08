//! Snapshot consumers
//!
//! The processing task never calls a [`Sink`] directly. Snapshots go through
//! a bounded queue drained by a separate task, so a slow sink only ever
//! costs dropped snapshots, never a stalled frame loop.

use crate::error::{Result, TrackingError};
use crate::processing::{ObjectId, Snapshot, SnapshotRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// External consumer of snapshots.
///
/// Snapshots arrive in non-decreasing frame order, each at most once.
/// `flush` is called once when the run ends, including failed runs.
#[async_trait]
pub trait Sink: Send {
    async fn accept(&mut self, snapshot: Snapshot) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One exported trajectory row, rounded to 3 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub frame: u64,
    pub x_mm: f64,
    pub y_mm: f64,
    pub displacement_mm: f64,
    pub average_velocity_mm_s: f64,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl From<&SnapshotRecord> for TrajectoryPoint {
    fn from(r: &SnapshotRecord) -> Self {
        Self {
            frame: r.frame,
            x_mm: round3(r.x_mm),
            y_mm: round3(r.y_mm),
            displacement_mm: round3(r.displacement_mm),
            average_velocity_mm_s: round3(r.average_velocity_mm_s),
        }
    }
}

/// Full-run trajectory log, `{"ID_n": [point, ...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectoryLog {
    objects: BTreeMap<ObjectId, Vec<TrajectoryPoint>>,
}

impl TrajectoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, snapshot: &Snapshot) {
        for (id, record) in &snapshot.records {
            self.objects.entry(*id).or_default().push(record.into());
        }
    }

    pub fn points(&self, id: ObjectId) -> Option<&[TrajectoryPoint]> {
        self.objects.get(&id).map(Vec::as_slice)
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }

    /// Number of objects with at least one row
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json_pretty()?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }
}

/// `<video stem>_<YYYYmmdd_HHMMSS>.json`
pub fn trajectory_file_name(video: &Path, now: &DateTime<Local>) -> String {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("tracked_data");
    format!("{}_{}.json", stem, now.format("%Y%m%d_%H%M%S"))
}

/// Accumulates a [`TrajectoryLog`] and writes it on flush
pub struct JsonFileSink {
    path: PathBuf,
    log: TrajectoryLog,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log: TrajectoryLog::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> &TrajectoryLog {
        &self.log
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    async fn accept(&mut self, snapshot: Snapshot) -> Result<()> {
        self.log.record(&snapshot);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.log.is_empty() {
            warn!("No trajectory data recorded, skipping {}", self.path.display());
            return Ok(());
        }
        self.log
            .write_to(&self.path)
            .await
            .map_err(|e| TrackingError::Sink(format!("{}: {}", self.path.display(), e)))?;
        info!(
            "Wrote trajectories for {} objects to {}",
            self.log.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Logs one line per object row
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn accept(&mut self, snapshot: Snapshot) -> Result<()> {
        for (id, r) in &snapshot.records {
            info!(
                frame = snapshot.frame_index,
                object = %id,
                x_mm = r.x_mm,
                y_mm = r.y_mm,
                displacement_mm = r.displacement_mm,
                average_velocity_mm_s = r.average_velocity_mm_s,
                size_mm = r.size_mm,
                "{}",
                id
            );
        }
        debug!(
            "Frame {} processed in {:?}",
            snapshot.frame_index, snapshot.processing_latency
        );
        Ok(())
    }
}

/// Delivers every snapshot to each inner sink in order
pub struct FanoutSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Sink for FanoutSink {
    /// Every inner sink sees the snapshot; the first error is returned
    async fn accept(&mut self, snapshot: Snapshot) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.accept(snapshot.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn flush(&mut self) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush().await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshots: Vec<Snapshot>,
    flushes: usize,
}

/// Keeps snapshots in memory; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.lock().snapshots.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn accept(&mut self, snapshot: Snapshot) -> Result<()> {
        self.state.lock().snapshots.push(snapshot);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }
}

/// Producer side of the snapshot queue, owned by the processing task
pub(crate) struct SnapshotQueue {
    tx: mpsc::Sender<Snapshot>,
    emitted: u64,
    dropped: u64,
}

impl SnapshotQueue {
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Snapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                emitted: 0,
                dropped: 0,
            },
            rx,
        )
    }

    /// Never waits; a full queue drops the snapshot
    pub(crate) fn offer(&mut self, snapshot: Snapshot) {
        self.emitted += 1;
        if let Err(e) = self.tx.try_send(snapshot) {
            self.dropped += 1;
            let frame = match &e {
                mpsc::error::TrySendError::Full(s) | mpsc::error::TrySendError::Closed(s) => {
                    s.frame_index
                }
            };
            warn!("Sink queue unavailable, dropped snapshot for frame {}", frame);
        }
    }

    pub(crate) fn emitted(&self) -> u64 {
        self.emitted
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DrainStats {
    pub delivered: u64,
    pub errors: u64,
}

/// Deliver queued snapshots until the queue closes, then flush
pub(crate) async fn drain_into(
    mut sink: Box<dyn Sink>,
    mut rx: mpsc::Receiver<Snapshot>,
) -> DrainStats {
    let mut stats = DrainStats::default();

    while let Some(snapshot) = rx.recv().await {
        let frame = snapshot.frame_index;
        match sink.accept(snapshot).await {
            Ok(()) => stats.delivered += 1,
            Err(e) => {
                stats.errors += 1;
                warn!("Sink rejected snapshot for frame {}: {}", frame, e);
            }
        }
    }

    if let Err(e) = sink.flush().await {
        stats.errors += 1;
        warn!("Sink flush failed: {}", e);
    }
    stats
}
