use std::collections::HashMap;
use std::time::Duration;

/// Verdict of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CooldownVerdict {
    Allowed,
    /// Blocked until the given epoch time
    Blocked { until: f64 },
}

/// Records last-alert timestamps per camera and per (camera, label).
///
/// State is process-local; a restart clears it. Entries older than both
/// windows are pruned when new alerts are recorded.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    by_camera: HashMap<String, f64>,
    by_camera_label: HashMap<(String, String), f64>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero window disables that dimension.
    pub fn check(
        &self,
        camera: &str,
        label: &str,
        now: f64,
        camera_window: Duration,
        label_window: Duration,
    ) -> CooldownVerdict {
        if !camera_window.is_zero() {
            if let Some(&last) = self.by_camera.get(camera) {
                let until = last + camera_window.as_secs_f64();
                if now < until {
                    return CooldownVerdict::Blocked { until };
                }
            }
        }

        if !label_window.is_zero() {
            if let Some(&last) = self
                .by_camera_label
                .get(&(camera.to_string(), label.to_string()))
            {
                let until = last + label_window.as_secs_f64();
                if now < until {
                    return CooldownVerdict::Blocked { until };
                }
            }
        }

        CooldownVerdict::Allowed
    }

    /// Store `now` for both keys and drop entries outside both windows.
    pub fn record(
        &mut self,
        camera: &str,
        label: &str,
        now: f64,
        camera_window: Duration,
        label_window: Duration,
    ) {
        self.by_camera.insert(camera.to_string(), now);
        self.by_camera_label
            .insert((camera.to_string(), label.to_string()), now);

        let horizon = now - camera_window.as_secs_f64().max(label_window.as_secs_f64());
        self.by_camera.retain(|_, &mut last| last >= horizon);
        self.by_camera_label.retain(|_, &mut last| last >= horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAM: Duration = Duration::from_secs(30);
    const LABEL: Duration = Duration::from_secs(60);

    #[test]
    fn fresh_ledger_allows() {
        let ledger = CooldownLedger::new();
        assert_eq!(ledger.check("yard", "person", 100.0, CAM, LABEL), CooldownVerdict::Allowed);
    }

    #[test]
    fn camera_window_blocks_any_label() {
        let mut ledger = CooldownLedger::new();
        ledger.record("yard", "person", 100.0, CAM, LABEL);

        // Different label, same camera: camera window applies
        match ledger.check("yard", "dog", 110.0, CAM, LABEL) {
            CooldownVerdict::Blocked { until } => assert!((until - 130.0).abs() < 1e-9),
            v => panic!("expected blocked, got {:?}", v),
        }
        assert_eq!(ledger.check("yard", "dog", 131.0, CAM, LABEL), CooldownVerdict::Allowed);
    }

    #[test]
    fn label_window_outlasts_camera_window() {
        let mut ledger = CooldownLedger::new();
        ledger.record("yard", "person", 100.0, CAM, LABEL);

        // Camera window expired, label window still active
        match ledger.check("yard", "person", 140.0, CAM, LABEL) {
            CooldownVerdict::Blocked { until } => assert!((until - 160.0).abs() < 1e-9),
            v => panic!("expected blocked, got {:?}", v),
        }
        assert_eq!(
            ledger.check("yard", "person", 161.0, CAM, LABEL),
            CooldownVerdict::Allowed
        );
    }

    #[test]
    fn other_camera_unaffected() {
        let mut ledger = CooldownLedger::new();
        ledger.record("yard", "person", 100.0, CAM, LABEL);
        assert_eq!(
            ledger.check("driveway", "person", 101.0, CAM, LABEL),
            CooldownVerdict::Allowed
        );
    }

    #[test]
    fn zero_window_disables_dimension() {
        let mut ledger = CooldownLedger::new();
        ledger.record("yard", "person", 100.0, Duration::ZERO, Duration::ZERO);
        assert_eq!(
            ledger.check("yard", "person", 100.5, Duration::ZERO, Duration::ZERO),
            CooldownVerdict::Allowed
        );
    }

    #[test]
    fn stale_entries_pruned_on_record() {
        let mut ledger = CooldownLedger::new();
        ledger.record("yard", "person", 100.0, CAM, LABEL);
        ledger.record("porch", "cat", 500.0, CAM, LABEL);
        assert!(!ledger.by_camera.contains_key("yard"));
        assert!(ledger.by_camera.contains_key("porch"));
    }
}
