pub mod clock;
pub mod cooldown;
pub mod rules;
pub mod table;
pub mod tracker;

pub use clock::Clock;
pub use rules::{Decision, DenyReason, RuleSet};

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::frigate::FrigateClient;
use crate::messaging::egress::{self, AlertPayload, AlertSink};
use crate::messaging::frame::{EventEnvelope, EventFrame, FrameKind};
use cooldown::{CooldownLedger, CooldownVerdict};
use rules::EventSnapshot;
use table::{DeferralState, EventStatus, EventTable, LiveEvent};

/// Artifact confirmation bound when no max_event_duration is configured
const DEFAULT_ARTIFACT_WAIT: Duration = Duration::from_secs(30);

/// Everything the engine task reacts to. Inbound frames come from the MQTT
/// ingress; the other messages are posted back by timer and publish tasks
/// the engine itself spawned.
#[derive(Debug)]
pub enum EngineMsg {
    Frame(EventEnvelope),
    DeferralFired { event_id: String, generation: u64 },
    PublishSettled { event_id: String, delivered: bool },
    Shutdown,
}

/// The admission state machine. Owns the Event Table and Cooldown Ledger;
/// both are only ever touched from the engine task, so no locking is
/// involved. Timers and publish attempts run as spawned tasks that report
/// back through the engine channel.
pub struct AdmissionEngine {
    rules: RuleSet,
    api_base: String,
    clock: Clock,
    table: EventTable,
    cooldown: CooldownLedger,
    sink: Arc<dyn AlertSink>,
    checker: Option<Arc<FrigateClient>>,
    tx: mpsc::Sender<EngineMsg>,
}

impl AdmissionEngine {
    pub fn new(
        rules: RuleSet,
        api_base: String,
        clock: Clock,
        sink: Arc<dyn AlertSink>,
        checker: Option<Arc<FrigateClient>>,
        tx: mpsc::Sender<EngineMsg>,
    ) -> Self {
        Self {
            rules,
            api_base,
            clock,
            table: EventTable::new(),
            cooldown: CooldownLedger::new(),
            sink,
            checker,
            tx,
        }
    }

    /// Consume engine messages until shutdown. Each message is handled to
    /// completion before the next one, which serializes all state access.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMsg::Frame(envelope) => self.on_envelope(&envelope),
                EngineMsg::DeferralFired {
                    event_id,
                    generation,
                } => self.on_deferral_fired(&event_id, generation),
                EngineMsg::PublishSettled {
                    event_id,
                    delivered,
                } => self.on_publish_settled(&event_id, delivered),
                EngineMsg::Shutdown => break,
            }
        }
        debug!("Admission engine stopped with {} live events", self.table.len());
    }

    fn on_envelope(&mut self, envelope: &EventEnvelope) {
        let Some(frame) = envelope.frame() else {
            warn!("Event message without an event body dropped");
            return;
        };

        match envelope.kind {
            FrameKind::End => self.on_end(frame),
            FrameKind::New | FrameKind::Update => self.on_live_frame(frame),
        }
    }

    /// A `new` frame, or any non-`end` frame for an id we have not seen.
    /// First-seen ids get a record and a provisional evaluation; known ids
    /// take the update path.
    fn on_live_frame(&mut self, frame: &EventFrame) {
        let (record, was_new) = self.table.upsert(frame);

        if was_new {
            info!(
                "NEW {} camera={} label={} zones={:?}",
                record.id, record.camera, record.label, record.zones
            );
            match evaluate_record(&self.rules, &self.clock, record) {
                Decision::Admit => {
                    schedule_admission(record, &self.rules, &self.clock, &self.tx);
                }
                Decision::Deny(reason) if reason.holds_pending() => {
                    // Zone membership changes as the object moves; keep the
                    // record eligible and let the deferral re-check.
                    debug!("{} waiting on {}", record.id, reason);
                    schedule_admission(record, &self.rules, &self.clock, &self.tx);
                }
                Decision::Deny(reason) => {
                    info!("SUPPRESS {} reason={}", record.id, reason);
                    record.status = EventStatus::Suppressed(reason);
                }
            }
            return;
        }

        self.on_update(frame);
    }

    fn on_update(&mut self, frame: &EventFrame) {
        let Some(record) = self.table.get_mut(&frame.id) else {
            return;
        };

        if !record.refresh(frame) {
            debug!("Stale frame for {} dropped", frame.id);
            return;
        }
        debug!("UPD {} zones={:?}", record.id, record.zones);

        let mut decision = None;
        match record.status {
            // Before the deferral fires the record just accumulates state;
            // once it has fired, updates drive re-evaluation.
            EventStatus::Pending => {
                if matches!(record.deferral, DeferralState::Fired) {
                    decision = Some(evaluate_record(&self.rules, &self.clock, record));
                }
            }
            // The one allowed resurrection: a record suppressed for a
            // missing artifact returns to Pending when the artifact shows
            // up, as long as the event is still within the age bound.
            EventStatus::Suppressed(reason) if reason.is_artifact() => {
                let available = match reason {
                    DenyReason::NoSnapshot => record.has_snapshot,
                    _ => record.has_clip,
                };
                let within_age = self.rules.max_event_duration.is_zero()
                    || self.clock.elapsed_since(record.created) <= self.rules.max_event_duration;
                if available && within_age {
                    info!("Artifact available for {}; resuming evaluation", record.id);
                    schedule_admission(record, &self.rules, &self.clock, &self.tx);
                }
            }
            _ => {}
        }

        if let Some(decision) = decision {
            self.apply_decision(&frame.id, decision);
        }
    }

    fn on_end(&mut self, frame: &EventFrame) {
        let Some(record) = self.table.get_mut(&frame.id) else {
            debug!("END {} for unknown event; ignoring", frame.id);
            return;
        };

        record.deferral.cancel();
        let prior = record.status;
        record.status = EventStatus::Terminal;
        info!("END {} (was {:?})", frame.id, prior);

        // A publish already in flight runs to completion; the record stays
        // until it settles.
        if record.settled() {
            self.table.remove(&frame.id);
        }
    }

    fn on_deferral_fired(&mut self, event_id: &str, generation: u64) {
        let Some(record) = self.table.get_mut(event_id) else {
            return;
        };
        if record.generation != generation {
            debug!("Stale deferral for {} ignored", event_id);
            return;
        }
        if record.status != EventStatus::Pending {
            return;
        }

        record.deferral = DeferralState::Fired;
        let decision = evaluate_record(&self.rules, &self.clock, record);
        self.apply_decision(event_id, decision);
    }

    /// Outcome of an evaluation once the minimum-duration point has passed
    fn apply_decision(&mut self, event_id: &str, decision: Decision) {
        match decision {
            Decision::Admit => self.try_admit(event_id),
            Decision::Deny(reason) if reason.holds_pending() => {
                debug!("{} still waiting on {}", event_id, reason);
            }
            Decision::Deny(reason) => {
                info!("SUPPRESS {} reason={}", event_id, reason);
                if let Some(record) = self.table.get_mut(event_id) {
                    record.status = EventStatus::Suppressed(reason);
                }
            }
        }
    }

    /// Final gate before publishing: the cooldown ledger, plus any publish
    /// already in flight that will write the ledger when it lands.
    fn try_admit(&mut self, event_id: &str) {
        let Some(record) = self.table.get_mut(event_id) else {
            return;
        };
        let camera = record.camera.clone();
        let label = record.label.clone();

        let now = self.clock.now();
        let blocked = match self.cooldown.check(
            &camera,
            &label,
            now,
            self.rules.cooldown_camera,
            self.rules.cooldown_label,
        ) {
            CooldownVerdict::Blocked { until } => {
                info!(
                    "SUPPRESS {} reason=cooldown camera={} clears in {:.0}s",
                    event_id,
                    camera,
                    until - now
                );
                true
            }
            CooldownVerdict::Allowed => {
                let reserved = self.publish_reserved(&camera, &label);
                if reserved {
                    info!(
                        "SUPPRESS {} reason=cooldown camera={} publish in flight",
                        event_id, camera
                    );
                }
                reserved
            }
        };

        if blocked {
            if let Some(record) = self.table.get_mut(event_id) {
                record.status = EventStatus::Suppressed(DenyReason::Cooldown);
            }
            return;
        }

        self.begin_publish(event_id);
    }

    /// An unsettled publish for the same camera (or camera+label) holds its
    /// cooldown slot before the ledger is written.
    fn publish_reserved(&self, camera: &str, label: &str) -> bool {
        self.table.values().any(|r| {
            r.publish_inflight
                && r.camera == camera
                && (!self.rules.cooldown_camera.is_zero()
                    || (!self.rules.cooldown_label.is_zero() && r.label == label))
        })
    }

    /// Mark the record Admitted and hand it to the publish pipeline. The
    /// alerted flag is set here, exactly once, so no later path can publish
    /// the same event id again.
    fn begin_publish(&mut self, event_id: &str) {
        let Some(record) = self.table.get_mut(event_id) else {
            return;
        };
        record.status = EventStatus::Admitted;
        record.alerted = true;
        record.publish_inflight = true;
        info!(
            "ADMIT {} camera={} label={}",
            record.id, record.camera, record.label
        );

        let payload = AlertPayload::from_event(record, &self.api_base);

        let mut confirmations = Vec::new();
        if let Some(checker) = &self.checker {
            if self.rules.require_snapshot {
                confirmations.push(checker.snapshot_url(&record.id));
            }
            if self.rules.require_video {
                confirmations.push(checker.clip_url(&record.id));
            }
        }
        let deadline = if self.rules.max_event_duration.is_zero() {
            DEFAULT_ARTIFACT_WAIT
        } else {
            self.rules
                .max_event_duration
                .saturating_sub(self.clock.elapsed_since(record.created))
        };

        let sink = Arc::clone(&self.sink);
        let checker = self.checker.clone();
        let tx = self.tx.clone();
        let event_id = record.id.clone();

        tokio::spawn(async move {
            let mut delivered = true;
            if let Some(checker) = checker {
                for url in &confirmations {
                    if !checker.await_artifact(url, deadline).await {
                        delivered = false;
                        break;
                    }
                }
            }
            let delivered = delivered && egress::deliver(sink.as_ref(), &payload).await;
            let _ = tx
                .send(EngineMsg::PublishSettled {
                    event_id,
                    delivered,
                })
                .await;
        });
    }

    /// The publish task finished. Cooldown is recorded only on delivery;
    /// a failed publish leaves the record alerted so it is never retried
    /// by a later frame.
    fn on_publish_settled(&mut self, event_id: &str, delivered: bool) {
        let now = self.clock.now();
        let Some(record) = self.table.get_mut(event_id) else {
            return;
        };
        record.publish_inflight = false;
        let camera = record.camera.clone();
        let label = record.label.clone();
        let done = record.status == EventStatus::Terminal && record.settled();

        if delivered {
            self.cooldown.record(
                &camera,
                &label,
                now,
                self.rules.cooldown_camera,
                self.rules.cooldown_label,
            );
            info!("Alert published for {} camera={} label={}", event_id, camera, label);
        } else {
            warn!("Alert for {} was dropped after delivery failures", event_id);
        }

        if done {
            self.table.remove(event_id);
        }
    }
}

/// Build the evaluator input from a live record and run the rules against
/// it. Stationary state comes from the record's motion track.
fn evaluate_record(rules: &RuleSet, clock: &Clock, record: &LiveEvent) -> Decision {
    let stationary = rules.tracking_enabled
        && record.track.is_stationary(
            rules.displacement_threshold,
            rules.min_event_duration,
            clock.now(),
        );
    let snapshot = EventSnapshot {
        camera: &record.camera,
        label: &record.label,
        zones: &record.zones,
        has_snapshot: record.has_snapshot,
        has_clip: record.has_clip,
        age: clock.elapsed_since(record.created),
        stationary,
    };
    rules.evaluate(&snapshot)
}

/// Put a record on the deferral path: Pending, with a timer at
/// `created + min_event_duration` (immediately when that is already past).
/// Every admission goes through this pipeline so cooldown, stationary and
/// artifact state are checked at fire time.
fn schedule_admission(
    record: &mut LiveEvent,
    rules: &RuleSet,
    clock: &Clock,
    tx: &mpsc::Sender<EngineMsg>,
) {
    record.deferral.cancel();
    record.generation += 1;
    record.status = EventStatus::Pending;

    let fire_at = record.created + rules.min_event_duration.as_secs_f64();
    let handle = clock.schedule(tx.clone(), record.id.clone(), record.generation, fire_at);
    record.deferral = DeferralState::Scheduled(handle);
}
