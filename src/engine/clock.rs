use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::EngineMsg;

/// Monotonic time source for the admission engine.
///
/// Frigate frames carry wall-clock epoch timestamps while all scheduling
/// must be monotonic, so the clock anchors the wall epoch observed at
/// construction to a monotonic instant and derives every later reading from
/// the monotonic side. Under `tokio::time::pause` the readings advance with
/// virtual time, which is what the engine tests rely on.
#[derive(Debug, Clone)]
pub struct Clock {
    wall_anchor: f64,
    mono_anchor: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            wall_anchor: wall,
            mono_anchor: Instant::now(),
        }
    }

    /// Current time as epoch seconds, driven by the monotonic clock
    pub fn now(&self) -> f64 {
        self.wall_anchor + self.mono_anchor.elapsed().as_secs_f64()
    }

    /// Seconds elapsed since `since` (an epoch timestamp), clamped at zero
    pub fn elapsed_since(&self, since: f64) -> Duration {
        Duration::from_secs_f64((self.now() - since).max(0.0))
    }

    /// Schedule a deferral fire for `event_id` at epoch time `fire_at`.
    ///
    /// The returned handle cancels the timer via `abort()`, which is
    /// idempotent. A timer that already fired delivers its message anyway;
    /// the engine discards it by generation.
    pub fn schedule(
        &self,
        tx: mpsc::Sender<EngineMsg>,
        event_id: String,
        generation: u64,
        fire_at: f64,
    ) -> JoinHandle<()> {
        let delay = Duration::from_secs_f64((fire_at - self.now()).max(0.0));
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(EngineMsg::DeferralFired {
                    event_id,
                    generation,
                })
                .await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn now_advances_with_virtual_time() {
        let clock = Clock::new();
        let t0 = clock.now();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let dt = clock.now() - t0;
        assert!((dt - 5.0).abs() < 0.1, "advanced {dt}s, expected 5s");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_timer_delivers_generation() {
        let clock = Clock::new();
        let (tx, mut rx) = mpsc::channel(4);
        clock.schedule(tx, "ev1".to_string(), 7, clock.now() + 2.0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        match rx.recv().await {
            Some(EngineMsg::DeferralFired {
                event_id,
                generation,
            }) => {
                assert_eq!(event_id, "ev1");
                assert_eq!(generation, 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_timer_never_fires() {
        let clock = Clock::new();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = clock.schedule(tx, "ev2".to_string(), 1, clock.now() + 2.0);
        handle.abort();
        handle.abort(); // idempotent

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
