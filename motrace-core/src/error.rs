//! Error types for motrace-core

use crate::processing::ObjectId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Object id collision: {0} is already registered")]
    IdCollision(ObjectId),

    #[error("Object id space exhausted")]
    IdExhausted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(String),
}

impl TrackingError {
    /// Whether this error ends a pipeline run.
    ///
    /// Channel timeouts, dropped frames, and degenerate detections never
    /// surface as errors at all; sink failures are counted but absorbed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackingError::SourceUnavailable(_)
                | TrackingError::IdCollision(_)
                | TrackingError::IdExhausted
                | TrackingError::Config(_)
                | TrackingError::Task(_)
        )
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TrackingError {
    fn from(err: tokio::task::JoinError) -> Self {
        TrackingError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
