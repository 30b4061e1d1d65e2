use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::config::{AppConfig, ZoneRule};

/// Why an event was denied admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoRule,
    Label,
    IgnoredZone,
    MissingRequiredZone,
    TooOld,
    NoSnapshot,
    NoClip,
    Stationary,
    Cooldown,
}

impl DenyReason {
    /// Artifact prerequisites may clear on a later update; a record
    /// suppressed for one of these is allowed back to Pending when the
    /// artifact arrives.
    pub fn is_artifact(self) -> bool {
        matches!(self, DenyReason::NoSnapshot | DenyReason::NoClip)
    }

    /// A missing required zone keeps the record Pending rather than
    /// suppressing it: zone membership routinely changes while the object
    /// moves through the frame.
    pub fn holds_pending(self) -> bool {
        matches!(self, DenyReason::MissingRequiredZone)
    }
}

impl Display for DenyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoRule => "no-rule",
            Self::Label => "label",
            Self::IgnoredZone => "ignored-zone",
            Self::MissingRequiredZone => "missing-required-zone",
            Self::TooOld => "too-old",
            Self::NoSnapshot => "no-snapshot",
            Self::NoClip => "no-clip",
            Self::Stationary => "stationary",
            Self::Cooldown => "cooldown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(DenyReason),
}

/// The event state an evaluation runs against. `age` is the caller-supplied
/// `now - created`, so the evaluator itself stays independent of wall clock.
#[derive(Debug)]
pub struct EventSnapshot<'a> {
    pub camera: &'a str,
    pub label: &'a str,
    pub zones: &'a [String],
    pub has_snapshot: bool,
    pub has_clip: bool,
    pub age: Duration,
    pub stationary: bool,
}

#[derive(Debug, Clone)]
struct CameraRule {
    labels: Vec<String>,
    require: Vec<ZoneRule>,
    ignore: Vec<ZoneRule>,
}

/// Static admission rules compiled from configuration
#[derive(Debug, Clone)]
pub struct RuleSet {
    cameras: HashMap<String, CameraRule>,
    pub min_event_duration: Duration,
    pub max_event_duration: Duration,
    pub require_snapshot: bool,
    pub require_video: bool,
    pub cooldown_camera: Duration,
    pub cooldown_label: Duration,
    pub tracking_enabled: bool,
    pub displacement_threshold: f64,
}

fn label_matches(labels: &[String], label: &str) -> bool {
    labels.iter().any(|l| l == "*" || l == label)
}

impl RuleSet {
    pub fn from_config(config: &AppConfig) -> Self {
        let cameras = config
            .alerts
            .iter()
            .filter(|alert| alert.enabled)
            .map(|alert| {
                (
                    alert.camera.clone(),
                    CameraRule {
                        labels: alert.labels.clone(),
                        require: alert.zones.require.clone(),
                        ignore: alert.zones.ignore.clone(),
                    },
                )
            })
            .collect();

        Self {
            cameras,
            min_event_duration: config.alert_rules.min_event_duration,
            max_event_duration: config.alert_rules.max_event_duration,
            require_snapshot: config.alert_rules.snapshot,
            require_video: config.alert_rules.video,
            cooldown_camera: config.alert_rules.cooldown.camera,
            cooldown_label: config.alert_rules.cooldown.label,
            tracking_enabled: config.object_tracking.enabled,
            displacement_threshold: config.object_tracking.displacement_threshold,
        }
    }

    /// Decide whether an event qualifies for an alert. Checks run in a fixed
    /// order and the first failure wins; the minimum-duration threshold is
    /// enforced by the engine's deferral, not here.
    pub fn evaluate(&self, snap: &EventSnapshot) -> Decision {
        let Some(rule) = self.cameras.get(snap.camera) else {
            return Decision::Deny(DenyReason::NoRule);
        };

        if !label_matches(&rule.labels, snap.label) {
            return Decision::Deny(DenyReason::Label);
        }

        for entry in &rule.ignore {
            if snap.zones.iter().any(|z| z == &entry.zone)
                && label_matches(&entry.labels, snap.label)
            {
                return Decision::Deny(DenyReason::IgnoredZone);
            }
        }

        if !rule.require.is_empty() {
            let satisfied = rule.require.iter().any(|entry| {
                snap.zones.iter().any(|z| z == &entry.zone)
                    && label_matches(&entry.labels, snap.label)
            });
            if !satisfied {
                return Decision::Deny(DenyReason::MissingRequiredZone);
            }
        }

        if !self.max_event_duration.is_zero() && snap.age > self.max_event_duration {
            return Decision::Deny(DenyReason::TooOld);
        }

        if self.require_snapshot && !snap.has_snapshot {
            return Decision::Deny(DenyReason::NoSnapshot);
        }
        if self.require_video && !snap.has_clip {
            return Decision::Deny(DenyReason::NoClip);
        }

        if self.tracking_enabled && snap.stationary {
            return Decision::Deny(DenyReason::Stationary);
        }

        Decision::Admit
    }
}
