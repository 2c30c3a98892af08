//! Bounded frame channel between acquisition and processing

use crate::config::{ChannelConfig, OverflowPolicy};
use crate::pipeline::CancellationFlag;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::timeout;
use tracing::warn;

/// Create a single-producer/single-consumer frame channel
pub fn frame_channel<T: Send>(
    config: &ChannelConfig,
    cancel: CancellationFlag,
) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    (
        FrameSender {
            tx,
            policy: config.overflow_policy,
            push_timeout: config.push_timeout(),
            cancel: cancel.clone(),
            pushed: 0,
            dropped: 0,
            refused: 0,
        },
        FrameReceiver {
            rx,
            pop_timeout: config.pop_timeout(),
            cancel,
        },
    )
}

/// Producer half
pub struct FrameSender<T> {
    tx: mpsc::Sender<T>,
    policy: OverflowPolicy,
    push_timeout: Duration,
    cancel: CancellationFlag,
    pushed: u64,
    dropped: u64,
    refused: u64,
}

impl<T: Send> FrameSender<T> {
    /// Enqueue one item. Returns false if it was not enqueued.
    ///
    /// When the channel is full, `DropNewest` waits up to the push timeout
    /// and then discards `item`; `Block` waits for space until cancelled.
    pub async fn push(&mut self, item: T) -> bool {
        if self.cancel.is_cancelled() {
            self.refused += 1;
            return false;
        }

        let item = match self.tx.try_send(item) {
            Ok(()) => {
                self.pushed += 1;
                return true;
            }
            Err(TrySendError::Closed(_)) => {
                self.refused += 1;
                return false;
            }
            Err(TrySendError::Full(item)) => item,
        };

        let sent = match self.policy {
            OverflowPolicy::DropNewest => {
                match timeout(self.push_timeout, self.tx.send(item)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        self.refused += 1;
                        false
                    }
                    Err(_) => {
                        self.dropped += 1;
                        warn!(
                            "Frame channel full for {:?}, dropped newest frame ({} dropped so far)",
                            self.push_timeout, self.dropped
                        );
                        false
                    }
                }
            }
            OverflowPolicy::Block => {
                let sent = tokio::select! {
                    res = self.tx.send(item) => res.is_ok(),
                    _ = self.cancel.cancelled() => false,
                };
                if !sent {
                    self.refused += 1;
                }
                sent
            }
        };

        if sent {
            self.pushed += 1;
        }
        sent
    }

    /// Items enqueued so far
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Items discarded because the channel stayed full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Items turned away because the run was shutting down
    pub fn refused(&self) -> u64 {
        self.refused
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Outcome of one [`FrameReceiver::pop`]
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    /// Timed out with the channel empty, run still active
    Idle,
    /// Producer gone, or timed out empty after cancellation
    Finished,
}

/// Consumer half
pub struct FrameReceiver<T> {
    rx: mpsc::Receiver<T>,
    pop_timeout: Duration,
    cancel: CancellationFlag,
}

impl<T: Send> FrameReceiver<T> {
    pub async fn pop(&mut self) -> Pop<T> {
        match timeout(self.pop_timeout, self.rx.recv()).await {
            Ok(Some(item)) => Pop::Item(item),
            Ok(None) => Pop::Finished,
            Err(_) if self.cancel.is_cancelled() => Pop::Finished,
            Err(_) => Pop::Idle,
        }
    }

    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Refuse further pushes; items already queued can still be popped
    pub fn close(&mut self) {
        self.rx.close();
    }
}
