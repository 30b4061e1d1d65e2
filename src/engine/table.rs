use std::collections::HashMap;
use tokio::task::JoinHandle;

use super::rules::DenyReason;
use super::tracker::MotionTrack;
use crate::messaging::frame::EventFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Admitted,
    Suppressed(DenyReason),
    Terminal,
}

/// Deferral timer state. `Fired` means the minimum-duration point has
/// passed, so updates may drive re-evaluation directly.
#[derive(Debug)]
pub enum DeferralState {
    Idle,
    Scheduled(JoinHandle<()>),
    Fired,
}

impl DeferralState {
    pub fn cancel(&mut self) {
        if let DeferralState::Scheduled(handle) = self {
            handle.abort();
        }
        *self = DeferralState::Idle;
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, DeferralState::Scheduled(_))
    }
}

/// The Event Table's record for one in-flight event id
#[derive(Debug)]
pub struct LiveEvent {
    pub id: String,
    pub camera: String,
    pub label: String,
    pub sub_label: Option<String>,
    /// Creation timestamp from the first frame, epoch seconds
    pub created: f64,
    /// Last-updated timestamp of the newest accepted frame
    pub updated: f64,
    pub zones: Vec<String>,
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub status: EventStatus,
    pub deferral: DeferralState,
    pub track: MotionTrack,
    /// Whether the publish pipeline has been started for this event
    pub alerted: bool,
    pub publish_inflight: bool,
    /// Guards stale deferral-fire messages after cancel/reschedule
    pub generation: u64,
}

impl LiveEvent {
    pub fn from_frame(frame: &EventFrame) -> Self {
        let mut track = MotionTrack::new();
        track.push(frame.updated_at(), frame.center());
        Self {
            id: frame.id.clone(),
            camera: frame.camera.clone(),
            label: frame.label.clone(),
            sub_label: frame.sub_label.clone(),
            created: frame.start_time,
            updated: frame.updated_at(),
            zones: frame.current_zones.clone(),
            has_snapshot: frame.has_snapshot,
            has_clip: frame.has_clip,
            status: EventStatus::Pending,
            deferral: DeferralState::Idle,
            track,
            alerted: false,
            publish_inflight: false,
            generation: 0,
        }
    }

    /// Apply an update frame. Returns false without touching anything when
    /// the frame is older than the stored state, so an out-of-order message
    /// cannot revert zones or artifact flags.
    pub fn refresh(&mut self, frame: &EventFrame) -> bool {
        if frame.updated_at() < self.updated {
            return false;
        }
        self.updated = frame.updated_at();
        self.zones = frame.current_zones.clone();
        self.has_snapshot = frame.has_snapshot;
        self.has_clip = frame.has_clip;
        if frame.sub_label.is_some() {
            self.sub_label = frame.sub_label.clone();
        }
        self.track.push(frame.updated_at(), frame.center());
        true
    }

    /// No outstanding timer or publish work
    pub fn settled(&self) -> bool {
        !self.deferral.is_scheduled() && !self.publish_inflight
    }
}

/// In-memory map of live events keyed by event id. All access happens on
/// the engine task.
#[derive(Debug, Default)]
pub struct EventTable {
    events: HashMap<String, LiveEvent>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for a first-seen id, or fetch the existing one.
    pub fn upsert(&mut self, frame: &EventFrame) -> (&mut LiveEvent, bool) {
        let was_new = !self.events.contains_key(&frame.id);
        let record = self
            .events
            .entry(frame.id.clone())
            .or_insert_with(|| LiveEvent::from_frame(frame));
        (record, was_new)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut LiveEvent> {
        self.events.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<LiveEvent> {
        self.events.remove(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &LiveEvent> {
        self.events.values()
    }
}
