use async_trait::async_trait;
use log::{error, warn};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::time::Duration;

use crate::engine::table::LiveEvent;
use crate::error::Error;

pub const PUBLISH_ATTEMPTS: u32 = 3;
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Serialized form of an admitted alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub event_id: String,
    pub camera: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_label: Option<String>,
    /// ISO-8601 creation time of the underlying event
    pub created_at: String,
    pub zones: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_url: Option<String>,
    pub reason: &'static str,
}

impl AlertPayload {
    pub fn from_event(record: &LiveEvent, api_base: &str) -> Self {
        Self {
            event_id: record.id.clone(),
            camera: record.camera.clone(),
            label: record.label.clone(),
            sub_label: record.sub_label.clone(),
            created_at: iso8601(record.created),
            zones: record.zones.clone(),
            snapshot_url: record
                .has_snapshot
                .then(|| format!("{}/events/{}/snapshot.jpg", api_base, record.id)),
            clip_url: record
                .has_clip
                .then(|| format!("{}/events/{}/clip.mp4", api_base, record.id)),
            reason: "admit",
        }
    }
}

fn iso8601(epoch: f64) -> String {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - epoch.floor()) * 1e9) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Egress seam: the engine publishes through this, tests substitute an
/// in-memory sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, payload: &AlertPayload) -> Result<(), Error>;
}

/// Publishes alerts on the configured MQTT topic, QoS 1, not retained
pub struct MqttAlertSink {
    client: AsyncClient,
    topic: String,
}

impl MqttAlertSink {
    pub fn new(client: AsyncClient, topic: String) -> Self {
        Self { client, topic }
    }
}

#[async_trait]
impl AlertSink for MqttAlertSink {
    async fn publish(&self, payload: &AlertPayload) -> Result<(), Error> {
        let body = serde_json::to_vec(payload).map_err(|e| Error::Publish(e.to_string()))?;
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| Error::Publish(e.to_string()))
    }
}

/// Submit with bounded retries: up to 3 attempts, exponential backoff, 5 s
/// per attempt. Returns whether the alert was handed to the broker.
pub async fn deliver(sink: &dyn AlertSink, payload: &AlertPayload) -> bool {
    for attempt in 1..=PUBLISH_ATTEMPTS {
        match tokio::time::timeout(PUBLISH_TIMEOUT, sink.publish(payload)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => warn!(
                "Publish attempt {}/{} for {} failed: {}",
                attempt, PUBLISH_ATTEMPTS, payload.event_id, e
            ),
            Err(_) => warn!(
                "Publish attempt {}/{} for {} timed out",
                attempt, PUBLISH_ATTEMPTS, payload.event_id
            ),
        }
        if attempt < PUBLISH_ATTEMPTS {
            tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
        }
    }
    error!(
        "Giving up on alert for {} after {} attempts",
        payload.event_id, PUBLISH_ATTEMPTS
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn payload() -> AlertPayload {
        AlertPayload {
            event_id: "ev-1".to_string(),
            camera: "yard".to_string(),
            label: "person".to_string(),
            sub_label: None,
            created_at: iso8601(1722580000.5),
            zones: vec!["lawn".to_string()],
            snapshot_url: None,
            clip_url: None,
            reason: "admit",
        }
    }

    #[test]
    fn optional_fields_are_omitted() {
        let json = serde_json::to_value(payload()).unwrap();
        assert_eq!(json["event_id"], "ev-1");
        assert_eq!(json["reason"], "admit");
        assert!(json.get("sub_label").is_none());
        assert!(json.get("snapshot_url").is_none());
        assert!(json.get("clip_url").is_none());
        assert!(json["created_at"]
            .as_str()
            .unwrap()
            .starts_with("2024-08-02T"));
    }

    #[test]
    fn urls_included_when_artifacts_flagged() {
        let mut p = payload();
        p.snapshot_url = Some("http://h:5000/api/events/ev-1/snapshot.jpg".to_string());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(
            json["snapshot_url"],
            "http://h:5000/api/events/ev-1/snapshot.jpg"
        );
    }

    /// Fails the first `failures` publishes, then succeeds
    struct FlakySink {
        failures: Mutex<u32>,
        attempts: Mutex<u32>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                attempts: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AlertSink for FlakySink {
        async fn publish(&self, _payload: &AlertPayload) -> Result<(), Error> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Publish("broker unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_retries_through_transient_failures() {
        let sink = FlakySink::new(2);
        assert!(deliver(&sink, &payload()).await);
        assert_eq!(*sink.attempts.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_gives_up_after_three_attempts() {
        let sink = FlakySink::new(u32::MAX);
        assert!(!deliver(&sink, &payload()).await);
        assert_eq!(*sink.attempts.lock().unwrap(), 3);
    }
}
