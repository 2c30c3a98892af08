//! Identity tracking
//!
//! Associates each frame's detections with live objects by greedy
//! nearest-centroid matching and drives the per-object lifecycle:
//! `Pending` until the appearance debounce elapses, `Visible` afterwards,
//! removed once unseen for longer than the disappearance timeout.

use crate::config::TrackerConfig;
use crate::error::{Result, TrackingError};
use crate::processing::detection::{Detection, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Stable object identity, rendered as `ID_<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID_{}", self.0)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.strip_prefix("ID_")
            .and_then(|n| n.parse::<u64>().ok())
            .map(ObjectId)
            .ok_or_else(|| format!("invalid object id: {}", s))
    }
}

/// Lifecycle state of a live object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// Debounce timer running, not surfaced
    Pending,
    /// Survived the debounce window
    Visible,
}

/// A persistent identity correlating detections across frames
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: ObjectId,
    /// Last known centroid (px)
    pub centroid: Point,
    /// Last known bounding box area (px²)
    pub size_px: f64,
    pub created_at: f64,
    pub last_seen_at: f64,
    /// Sum of strictly positive velocity samples (px/s)
    pub total_velocity: f64,
    pub velocity_samples: u64,
    pub state: ObjectState,
}

impl TrackedObject {
    fn new(id: ObjectId, detection: &Detection, now: f64) -> Self {
        Self {
            id,
            centroid: detection.centroid,
            size_px: detection.area,
            created_at: now,
            last_seen_at: now,
            total_velocity: 0.0,
            velocity_samples: 0,
            state: ObjectState::Pending,
        }
    }

    /// Running average velocity in px/s, zero without samples
    pub fn average_velocity(&self) -> f64 {
        if self.velocity_samples == 0 {
            0.0
        } else {
            self.total_velocity / self.velocity_samples as f64
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state == ObjectState::Visible
    }

    fn observe(&mut self, detection: &Detection, now: f64) {
        let distance = self.centroid.distance(&detection.centroid);
        let elapsed = now - self.last_seen_at;
        let velocity = if elapsed > 0.0 { distance / elapsed } else { 0.0 };

        if velocity > 0.0 && velocity.is_finite() {
            self.total_velocity += velocity;
            self.velocity_samples += 1;
        }

        self.centroid = detection.centroid;
        self.size_px = detection.area;
        self.last_seen_at = self.last_seen_at.max(now);
    }

    /// Returns true on the Pending -> Visible transition
    fn try_promote(&mut self, now: f64, debounce: f64) -> bool {
        if self.state == ObjectState::Pending && now - self.created_at >= debounce {
            self.state = ObjectState::Visible;
            true
        } else {
            false
        }
    }
}

/// What changed in the registry during one `update`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameUpdate {
    pub created: Vec<ObjectId>,
    pub promoted: Vec<ObjectId>,
    pub evicted: Vec<ObjectId>,
}

/// Registry of live objects, owned by the processing task
pub struct IdentityTracker {
    objects: BTreeMap<ObjectId, TrackedObject>,
    next_id: u64,
    match_distance: f64,
    debounce: f64,
    timeout: f64,
    created_total: u64,
    evicted_total: u64,
}

impl IdentityTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 1,
            match_distance: config.match_distance_px,
            debounce: config.appearance_debounce_secs,
            timeout: config.disappearance_timeout_secs,
            created_total: 0,
            evicted_total: 0,
        }
    }

    /// Advance the registry by one frame observed at `now` (seconds).
    ///
    /// Each detection is matched to the first live object, in ascending id
    /// order, whose centroid lies strictly closer than the match distance.
    /// Objects created earlier in the same frame take part in matching, and
    /// one object may absorb several detections. Objects already past the
    /// disappearance timeout are evicted first so they can never be matched.
    pub fn update(&mut self, now: f64, detections: &[Detection]) -> Result<FrameUpdate> {
        let mut update = FrameUpdate {
            evicted: self.evict_stale(now),
            ..FrameUpdate::default()
        };

        for detection in detections {
            if detection.bbox.is_degenerate() || detection.area <= 0.0 {
                continue;
            }

            let matched = self
                .objects
                .values_mut()
                .find(|obj| obj.centroid.distance(&detection.centroid) < self.match_distance);

            match matched {
                Some(obj) => {
                    obj.observe(detection, now);
                    if obj.try_promote(now, self.debounce) {
                        update.promoted.push(obj.id);
                    }
                }
                None => {
                    let id = self.allocate_id()?;
                    let mut obj = TrackedObject::new(id, detection, now);
                    if obj.try_promote(now, self.debounce) {
                        update.promoted.push(id);
                    }
                    debug!(
                        "Created {} at ({:.1}, {:.1})",
                        id, detection.centroid.x, detection.centroid.y
                    );
                    self.objects.insert(id, obj);
                    self.created_total += 1;
                    update.created.push(id);
                }
            }
        }

        Ok(update)
    }

    /// Matched objects carry `last_seen_at == now`, so one pass before
    /// matching catches everything that is stale at `now`.
    fn evict_stale(&mut self, now: f64) -> Vec<ObjectId> {
        let timeout = self.timeout;
        let evicted: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|obj| now - obj.last_seen_at > timeout)
            .map(|obj| obj.id)
            .collect();
        for id in &evicted {
            self.objects.remove(id);
            debug!("Evicted {}", id);
        }
        self.evicted_total += evicted.len() as u64;
        evicted
    }

    fn allocate_id(&mut self) -> Result<ObjectId> {
        let id = ObjectId(self.next_id);
        if self.objects.contains_key(&id) {
            return Err(TrackingError::IdCollision(id));
        }
        self.next_id = self.next_id.checked_add(1).ok_or(TrackingError::IdExhausted)?;
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&TrackedObject> {
        self.objects.get(&id)
    }

    /// All live objects in ascending id order
    pub fn objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }

    /// Visible objects in ascending id order
    pub fn visible_objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values().filter(|obj| obj.is_visible())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Identities assigned so far in this run
    pub fn created_total(&self) -> u64 {
        self.created_total
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }
}
