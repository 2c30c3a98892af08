//! Configuration for the tracking pipeline

use crate::error::TrackingError;
use crate::processing::SegmenterParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the producer does when the frame channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait up to `push_timeout_ms`, then drop the incoming frame
    DropNewest,
    /// Wait for space until cancelled, stalling the frame source
    Block,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Parameters handed to the external motion segmenter
    pub segmenter: SegmenterConfig,

    /// Identity tracker thresholds
    pub tracker: TrackerConfig,

    /// Physical unit conversion and snapshot cadence
    pub metrics: MetricsConfig,

    /// Frame channel sizing and timeouts
    pub channel: ChannelConfig,

    /// Snapshot queue feeding the sink
    pub sink: SinkConfig,
}

/// Motion segmentation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Background model history length (frames)
    pub history_length: u32,

    /// Background model variance threshold
    pub variance_threshold: u32,

    /// Regions with an area at or below this value (px²) never reach the tracker
    pub min_contour_area: f64,
}

/// Identity tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Centroids closer than this (px) are the same object
    pub match_distance_px: f64,

    /// Seconds an object must exist before it becomes visible
    pub appearance_debounce_secs: f64,

    /// Seconds without a match after which an object is evicted
    pub disappearance_timeout_secs: f64,
}

/// Metrics aggregation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Millimetres per pixel
    pub pixel_to_mm: f64,

    /// Emit one snapshot every N processed frames
    pub snapshot_stride: u32,
}

/// Frame channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum number of queued frames
    pub capacity: usize,

    /// How long `push` waits for space under `DropNewest`
    pub push_timeout_ms: u64,

    /// How long `pop` waits before reporting an idle channel
    pub pop_timeout_ms: u64,

    /// How long the consumer keeps draining after cancellation
    pub drain_grace_ms: u64,

    /// Behaviour when the channel is full
    pub overflow_policy: OverflowPolicy,
}

/// Sink queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Snapshots buffered for the sink before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            history_length: 500,
            variance_threshold: 25,
            min_contour_area: 1000.0,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance_px: 50.0,
            appearance_debounce_secs: 1.0,
            disappearance_timeout_secs: 1.0,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pixel_to_mm: 0.1,
            snapshot_stride: 5,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            push_timeout_ms: 1000,
            pop_timeout_ms: 100,
            drain_grace_ms: 2000,
            overflow_policy: OverflowPolicy::DropNewest,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}

/// Longest duration accepted for any time-based setting
const MAX_SECONDS: f64 = 3600.0;
/// Longest accepted channel timeout
const MAX_TIMEOUT_MS: u64 = 60_000;

impl TrackingConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.segmenter.validate()?;
        self.tracker.validate()?;
        self.metrics.validate()?;
        self.channel.validate()?;
        self.sink.validate()?;
        Ok(())
    }

    /// Load configuration from a JSON, TOML, or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrackingError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_str(&content)
    }

    /// Parse configuration text, trying JSON, then TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, TrackingError> {
        if let Ok(config) = serde_json::from_str::<TrackingConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<TrackingConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<TrackingConfig>(content) {
            return Ok(config);
        }

        Err(TrackingError::Config(
            "Unrecognized configuration format (expected JSON, TOML, or YAML)".to_string(),
        ))
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, TrackingError> {
        toml::to_string_pretty(self).map_err(|e| TrackingError::Serialization(e.to_string()))
    }

    /// Apply `MOTRACE_*` environment variables on top of this configuration
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Values that fail to parse are ignored and leave the setting untouched.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse::<T>().ok())
        }

        if let Some(v) = parsed(&lookup, "MOTRACE_HISTORY_LENGTH") {
            self.segmenter.history_length = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_VARIANCE_THRESHOLD") {
            self.segmenter.variance_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_MIN_CONTOUR_AREA") {
            self.segmenter.min_contour_area = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_MATCH_DISTANCE_PX") {
            self.tracker.match_distance_px = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_APPEARANCE_DEBOUNCE_SECS") {
            self.tracker.appearance_debounce_secs = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_DISAPPEARANCE_TIMEOUT_SECS") {
            self.tracker.disappearance_timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_PIXEL_TO_MM") {
            self.metrics.pixel_to_mm = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_SNAPSHOT_STRIDE") {
            self.metrics.snapshot_stride = v;
        }
        if let Some(v) = parsed(&lookup, "MOTRACE_CHANNEL_CAPACITY") {
            self.channel.capacity = v;
        }
    }
}

impl SegmenterConfig {
    /// Validate segmenter configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.history_length == 0 || self.history_length > 10_000 {
            return Err("History length must be between 1 and 10000".to_string());
        }

        if self.variance_threshold == 0 || self.variance_threshold > 1000 {
            return Err("Variance threshold must be between 1 and 1000".to_string());
        }

        if !self.min_contour_area.is_finite() || self.min_contour_area < 0.0 {
            return Err("Minimum contour area must be a non-negative number".to_string());
        }

        if self.min_contour_area > 10_000_000.0 {
            return Err("Minimum contour area too large (max 10000000 px²)".to_string());
        }

        Ok(())
    }

    /// Parameters passed through to the segmenter on every call
    pub fn params(&self) -> SegmenterParams {
        SegmenterParams {
            history_length: self.history_length,
            variance_threshold: self.variance_threshold,
        }
    }
}

impl TrackerConfig {
    /// Validate tracker configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.match_distance_px.is_finite() || self.match_distance_px <= 0.0 {
            return Err("Match distance must be a positive number of pixels".to_string());
        }

        if !self.appearance_debounce_secs.is_finite()
            || self.appearance_debounce_secs < 0.0
            || self.appearance_debounce_secs > MAX_SECONDS
        {
            return Err(format!(
                "Appearance debounce must be between 0 and {} seconds",
                MAX_SECONDS
            ));
        }

        if !self.disappearance_timeout_secs.is_finite()
            || self.disappearance_timeout_secs < 0.0
            || self.disappearance_timeout_secs > MAX_SECONDS
        {
            return Err(format!(
                "Disappearance timeout must be between 0 and {} seconds",
                MAX_SECONDS
            ));
        }

        Ok(())
    }
}

impl MetricsConfig {
    /// Validate metrics configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.pixel_to_mm.is_finite() || self.pixel_to_mm <= 0.0 {
            return Err("Pixel to millimetre scale must be a positive number".to_string());
        }

        if self.snapshot_stride == 0 || self.snapshot_stride > 10_000 {
            return Err("Snapshot stride must be between 1 and 10000 frames".to_string());
        }

        Ok(())
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 || self.capacity > 4096 {
            return Err("Channel capacity must be between 1 and 4096 frames".to_string());
        }

        if self.push_timeout_ms > MAX_TIMEOUT_MS {
            return Err(format!("Push timeout too large (max {} ms)", MAX_TIMEOUT_MS));
        }

        if self.pop_timeout_ms == 0 || self.pop_timeout_ms > MAX_TIMEOUT_MS {
            return Err(format!("Pop timeout must be between 1 and {} ms", MAX_TIMEOUT_MS));
        }

        if self.drain_grace_ms > MAX_TIMEOUT_MS {
            return Err(format!("Drain grace too large (max {} ms)", MAX_TIMEOUT_MS));
        }

        Ok(())
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl SinkConfig {
    /// Validate sink configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 || self.queue_capacity > 65_536 {
            return Err("Sink queue capacity must be between 1 and 65536".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = TrackingConfig::default();
        assert_eq!(config.segmenter.history_length, 500);
        assert_eq!(config.segmenter.variance_threshold, 25);
        assert_eq!(config.segmenter.min_contour_area, 1000.0);
        assert_eq!(config.tracker.match_distance_px, 50.0);
        assert_eq!(config.tracker.appearance_debounce_secs, 1.0);
        assert_eq!(config.tracker.disappearance_timeout_secs, 1.0);
        assert_eq!(config.metrics.pixel_to_mm, 0.1);
        assert_eq!(config.metrics.snapshot_stride, 5);
        assert_eq!(config.channel.capacity, 20);
        assert_eq!(config.channel.overflow_policy, OverflowPolicy::DropNewest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_capacity() {
        let mut config = TrackingConfig::default();
        config.channel.capacity = 0;
        assert!(config.validate().is_err());

        config.channel.capacity = 4097;
        assert!(config.validate().is_err());

        config.channel.capacity = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_tracker() {
        let mut config = TrackingConfig::default();
        config.tracker.match_distance_px = 0.0;
        assert!(config.validate().is_err());

        config.tracker.match_distance_px = f64::NAN;
        assert!(config.validate().is_err());

        config.tracker.match_distance_px = 50.0;
        config.tracker.appearance_debounce_secs = -1.0;
        assert!(config.validate().is_err());

        config.tracker.appearance_debounce_secs = 0.0;
        config.tracker.disappearance_timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        config.tracker.disappearance_timeout_secs = 5.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_metrics() {
        let mut config = TrackingConfig::default();
        config.metrics.snapshot_stride = 0;
        assert!(config.validate().is_err());

        config.metrics.snapshot_stride = 1;
        config.metrics.pixel_to_mm = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_channel_timeouts() {
        let mut config = TrackingConfig::default();
        config.channel.pop_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.channel.pop_timeout_ms = 100;
        config.channel.push_timeout_ms = 0;
        assert!(config.validate().is_ok());

        config.channel.drain_grace_ms = MAX_TIMEOUT_MS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json_partial() {
        let json = r#"{
            "tracker": { "disappearance_timeout_secs": 5.0 },
            "channel": { "overflow_policy": "block" }
        }"#;
        let config = TrackingConfig::from_str(json).unwrap();
        assert_eq!(config.tracker.disappearance_timeout_secs, 5.0);
        assert_eq!(config.tracker.match_distance_px, 50.0);
        assert_eq!(config.channel.overflow_policy, OverflowPolicy::Block);
        assert_eq!(config.channel.capacity, 20);
    }

    #[test]
    fn test_config_from_toml() {
        let text = r#"
            [segmenter]
            history_length = 1200
            min_contour_area = 500.0

            [metrics]
            snapshot_stride = 1
        "#;
        let config = TrackingConfig::from_str(text).unwrap();
        assert_eq!(config.segmenter.history_length, 1200);
        assert_eq!(config.segmenter.min_contour_area, 500.0);
        assert_eq!(config.segmenter.variance_threshold, 25);
        assert_eq!(config.metrics.snapshot_stride, 1);
    }

    #[test]
    fn test_config_from_yaml() {
        let text = "tracker:\n  match_distance_px: 30.0\n";
        let config = TrackingConfig::from_str(text).unwrap();
        assert_eq!(config.tracker.match_distance_px, 30.0);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = TrackingConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(TrackingConfig::from_str(&text).unwrap(), config);
    }

    #[test]
    fn test_config_overrides() {
        let env: HashMap<&str, &str> = [
            ("MOTRACE_DISAPPEARANCE_TIMEOUT_SECS", "5"),
            ("MOTRACE_SNAPSHOT_STRIDE", " 2 "),
            ("MOTRACE_CHANNEL_CAPACITY", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = TrackingConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.tracker.disappearance_timeout_secs, 5.0);
        assert_eq!(config.metrics.snapshot_stride, 2);
        assert_eq!(config.channel.capacity, 20);
    }

    #[test]
    fn test_segmenter_params() {
        let config = SegmenterConfig {
            history_length: 800,
            variance_threshold: 40,
            min_contour_area: 1500.0,
        };
        let params = config.params();
        assert_eq!(params.history_length, 800);
        assert_eq!(params.variance_threshold, 40);
    }
}
