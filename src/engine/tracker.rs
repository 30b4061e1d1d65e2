use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per event
const WINDOW: usize = 8;

/// Bounded history of bounding-box centers for one live event.
///
/// Centers are frame-normalized (x, y) pairs. Frames without a usable box
/// contribute no sample, so a sparse track simply reports non-stationary.
#[derive(Debug, Default)]
pub struct MotionTrack {
    samples: VecDeque<(f64, [f64; 2])>,
}

impl MotionTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: f64, center: Option<[f64; 2]>) {
        let Some(center) = center else { return };
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((at, center));
    }

    /// Max pairwise Euclidean distance over the window
    pub fn displacement(&self) -> f64 {
        let mut max = 0.0f64;
        for (i, (_, a)) in self.samples.iter().enumerate() {
            for (_, b) in self.samples.iter().skip(i + 1) {
                let dx = a[0] - b[0];
                let dy = a[1] - b[1];
                max = max.max((dx * dx + dy * dy).sqrt());
            }
        }
        max
    }

    /// Time the object has been under observation: from the oldest retained
    /// sample up to `now`, not to the last sample, so a window keeps
    /// maturing between updates.
    pub fn span(&self, now: f64) -> Duration {
        match self.samples.front() {
            Some((first, _)) => Duration::from_secs_f64((now - first).max(0.0)),
            None => Duration::ZERO,
        }
    }

    /// An event is stationary when its displacement stays under `threshold`
    /// and the observation window covers at least `min_span`. With fewer
    /// than two samples there is no displacement to judge.
    pub fn is_stationary(&self, threshold: f64, min_span: Duration, now: f64) -> bool {
        self.samples.len() >= 2 && self.span(now) >= min_span && self.displacement() < threshold
    }
}
