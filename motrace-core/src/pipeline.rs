//! Pipeline session: producer, consumer, and sink drain tasks

use crate::channel::{frame_channel, FrameReceiver, FrameSender, Pop};
use crate::config::TrackingConfig;
use crate::error::{Result, TrackingError};
use crate::processing::{DetectionAdapter, IdentityTracker, MetricsAggregator, MotionSegmenter};
use crate::sink::{drain_into, DrainStats, Sink, SnapshotQueue};
use crate::source::{Frame, FrameSource};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: RwLock<bool>,
    notify: Notify,
}

/// Shared stop signal observed by every pipeline task at its next
/// suspension point
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    state: Arc<CancelState>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.state.cancelled.write();
        if !*cancelled {
            *cancelled = true;
            self.state.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.read()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Counters reported when a run ends
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub frames_read: u64,
    /// Dropped by the frame channel overflow policy
    pub frames_dropped: u64,
    pub frames_processed: u64,
    /// Read but never processed because the run was shutting down
    pub frames_discarded: u64,
    pub snapshots_emitted: u64,
    pub snapshots_dropped: u64,
    pub snapshots_delivered: u64,
    pub sink_errors: u64,
    /// Frame reads that failed without ending the run
    pub source_errors: u64,
    /// Distinct identities assigned during the run
    pub objects_created: u64,
    pub objects_evicted: u64,
    /// Run ended by an explicit stop rather than source exhaustion
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct ProducerStats {
    read: u64,
    dropped: u64,
    refused: u64,
    errors: u64,
}

#[derive(Debug, Default)]
struct ConsumerStats {
    processed: u64,
    discarded: u64,
    snapshots_emitted: u64,
    snapshots_dropped: u64,
    objects_created: u64,
    objects_evicted: u64,
}

/// One tracking run.
///
/// Owns all run state; the live-object registry stays inside the consumer
/// task and only snapshot copies leave it.
pub struct PipelineSession {
    cancel: CancellationFlag,
    producer: JoinHandle<Result<ProducerStats>>,
    consumer: JoinHandle<Result<ConsumerStats>>,
    drain: JoinHandle<DrainStats>,
    started: Instant,
}

impl PipelineSession {
    /// Validate `config` and spawn the pipeline tasks on the current runtime
    pub fn start<Src, Seg>(
        config: TrackingConfig,
        source: Src,
        segmenter: Seg,
        sink: Box<dyn Sink>,
    ) -> Result<Self>
    where
        Src: FrameSource + 'static,
        Seg: MotionSegmenter<Src::Payload> + 'static,
    {
        config.validate().map_err(TrackingError::Config)?;

        let cancel = CancellationFlag::new();
        let (tx, rx) = frame_channel::<Frame<Src::Payload>>(&config.channel, cancel.clone());
        let (queue, snapshots) = SnapshotQueue::new(config.sink.queue_capacity);
        let adapter = DetectionAdapter::new(
            segmenter,
            config.segmenter.params(),
            config.segmenter.min_contour_area,
        );

        info!(
            "Starting pipeline: channel capacity {}, {:?} on overflow, snapshot every {} frames",
            config.channel.capacity, config.channel.overflow_policy, config.metrics.snapshot_stride
        );

        let drain = tokio::spawn(drain_into(sink, snapshots));
        let producer = tokio::spawn(produce(source, tx, cancel.clone()));
        let consumer = tokio::spawn(consume(config, rx, adapter, queue, cancel.clone()));

        Ok(Self {
            cancel,
            producer,
            consumer,
            drain,
            started: Instant::now(),
        })
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Request an orderly shutdown
    pub fn stop(&self) {
        info!("Pipeline stop requested");
        self.cancel.cancel();
    }

    /// Wait for every task to finish.
    ///
    /// The sink is flushed before this returns, whether the run succeeded
    /// or not. A producer failure takes precedence over a consumer failure.
    pub async fn wait(self) -> Result<RunSummary> {
        let producer = self.producer.await;
        let consumer = self.consumer.await;
        let drain = self.drain.await;

        let producer = producer.map_err(TrackingError::from).and_then(|r| r);
        let consumer = consumer.map_err(TrackingError::from).and_then(|r| r);

        let (producer, consumer) = match (producer, consumer) {
            (Err(e), _) | (Ok(_), Err(e)) => {
                error!("Pipeline failed: {}", e);
                return Err(e);
            }
            (Ok(p), Ok(c)) => (p, c),
        };
        let drain = drain?;

        let summary = RunSummary {
            frames_read: producer.read,
            frames_dropped: producer.dropped,
            frames_processed: consumer.processed,
            frames_discarded: consumer.discarded + producer.refused,
            snapshots_emitted: consumer.snapshots_emitted,
            snapshots_dropped: consumer.snapshots_dropped,
            snapshots_delivered: drain.delivered,
            sink_errors: drain.errors,
            source_errors: producer.errors,
            objects_created: consumer.objects_created,
            objects_evicted: consumer.objects_evicted,
            cancelled: self.cancel.is_cancelled(),
            elapsed: self.started.elapsed(),
        };

        info!(
            "Pipeline finished: {} frames processed, {} dropped, {} objects tracked, {} snapshots delivered",
            summary.frames_processed,
            summary.frames_dropped,
            summary.objects_created,
            summary.snapshots_delivered
        );
        Ok(summary)
    }
}

async fn produce<Src>(
    mut source: Src,
    mut tx: FrameSender<Frame<Src::Payload>>,
    cancel: CancellationFlag,
) -> Result<ProducerStats>
where
    Src: FrameSource,
{
    if let Err(e) = source.open().await {
        error!("Failed to open frame source: {}", e);
        cancel.cancel();
        return Err(e);
    }

    let mut read = 0u64;
    let mut errors = 0u64;
    let result = loop {
        if cancel.is_cancelled() {
            debug!("Producer observed cancellation");
            break Ok(());
        }
        match source.next_frame().await {
            Ok(Some(frame)) => {
                read += 1;
                tx.push(frame).await;
            }
            Ok(None) => {
                info!("Frame source exhausted after {} frames", read);
                break Ok(());
            }
            Err(e) if e.is_terminal() => {
                error!("Frame source failed: {}", e);
                cancel.cancel();
                break Err(e);
            }
            Err(e) => {
                errors += 1;
                warn!("Skipping unreadable frame: {}", e);
            }
        }
    };

    source.close().await;
    let stats = ProducerStats {
        read,
        dropped: tx.dropped(),
        refused: tx.refused(),
        errors,
    };
    // Dropping the sender closes the channel so the consumer sees Finished.
    drop(tx);
    result.map(|()| stats)
}

async fn consume<P, Seg>(
    config: TrackingConfig,
    mut rx: FrameReceiver<Frame<P>>,
    mut adapter: DetectionAdapter<Seg>,
    mut queue: SnapshotQueue,
    cancel: CancellationFlag,
) -> Result<ConsumerStats>
where
    P: Send + 'static,
    Seg: MotionSegmenter<P>,
{
    let mut tracker = IdentityTracker::new(&config.tracker);
    let mut metrics = MetricsAggregator::new(&config.metrics);
    let grace = config.channel.drain_grace();
    let mut deadline: Option<Instant> = None;
    let mut processed = 0u64;
    let mut discarded = 0u64;

    loop {
        if deadline.is_none() && cancel.is_cancelled() {
            debug!("Consumer draining queued frames for up to {:?}", grace);
            deadline = Some(Instant::now() + grace);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let frame = match rx.pop().await {
            Pop::Item(frame) => frame,
            Pop::Idle => continue,
            Pop::Finished => break,
        };

        let started = Instant::now();
        let detections = adapter.detect(&frame);
        let update = match tracker.update(frame.timestamp, &detections) {
            Ok(update) => update,
            Err(e) => {
                error!("Tracker failed at frame {}: {}", frame.index, e);
                cancel.cancel();
                return Err(e);
            }
        };
        processed += 1;

        if let Some(snapshot) = metrics.aggregate(frame.index, &tracker, &update, started.elapsed()) {
            queue.offer(snapshot);
        }
    }

    // Late pushes now fail on the producer side instead of vanishing here.
    rx.close();
    while rx.try_pop().is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        info!("Discarded {} queued frames after drain grace period", discarded);
    }

    Ok(ConsumerStats {
        processed,
        discarded,
        snapshots_emitted: queue.emitted(),
        snapshots_dropped: queue.dropped(),
        objects_created: tracker.created_total(),
        objects_evicted: tracker.evicted_total(),
    })
}
