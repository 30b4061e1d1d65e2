use serde::{Deserialize, Deserializer};

use crate::error::Error;

/// Lifecycle stage carried on a Frigate event message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    New,
    Update,
    End,
}

/// One message from the Frigate events topic. Frigate publishes the event
/// state before and after the change; `end` messages may carry the final
/// state only in `before`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub before: Option<EventFrame>,
    #[serde(default)]
    pub after: Option<EventFrame>,
}

impl EventEnvelope {
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))
    }

    /// The authoritative frame for this message
    pub fn frame(&self) -> Option<&EventFrame> {
        match self.kind {
            FrameKind::End => self.before.as_ref().or(self.after.as_ref()),
            _ => self.after.as_ref().or(self.before.as_ref()),
        }
    }
}

/// Decoded event state. Unknown fields in the payload are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub id: String,
    pub camera: String,
    pub label: String,
    #[serde(default, deserialize_with = "de_sub_label")]
    pub sub_label: Option<String>,
    /// Event creation time, epoch seconds
    pub start_time: f64,
    /// Time of the frame this state was observed in
    #[serde(default)]
    pub frame_time: Option<f64>,
    #[serde(default)]
    pub current_zones: Vec<String>,
    /// Frame-normalized corners [x1, y1, x2, y2]
    #[serde(default, rename = "box")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub has_snapshot: bool,
    #[serde(default)]
    pub has_clip: bool,
}

impl EventFrame {
    /// Last-updated timestamp, falling back to creation time
    pub fn updated_at(&self) -> f64 {
        self.frame_time.unwrap_or(self.start_time)
    }

    /// Bounding-box center, if the frame carried a box
    pub fn center(&self) -> Option<[f64; 2]> {
        self.bbox
            .map(|[x1, y1, x2, y2]| [(x1 + x2) / 2.0, (y1 + y2) / 2.0])
    }
}

/// Frigate has published `sub_label` as a plain string, as a
/// `[label, score]` pair, and as a list of `{subLabel: ...}` objects across
/// versions. Accept all of them.
fn de_sub_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        List(Vec<serde_json::Value>),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
        None => None,
        Some(Repr::Text(text)) => Some(text),
        Some(Repr::List(items)) => items.into_iter().find_map(|item| match item {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Object(map) => map
                .get("subLabel")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_event() {
        let payload = br#"{
            "type": "new",
            "before": null,
            "after": {
                "id": "1722580000.123-abcd",
                "camera": "yard",
                "label": "person",
                "sub_label": null,
                "start_time": 1722580000.12,
                "frame_time": 1722580000.45,
                "top_score": 0.82,
                "score": 0.74,
                "box": [0.40, 0.30, 0.60, 0.70],
                "area": 12000,
                "current_zones": ["lawn"],
                "entered_zones": ["lawn"],
                "has_snapshot": true,
                "has_clip": false,
                "stationary": false,
                "motionless_count": 0
            }
        }"#;
        let envelope = EventEnvelope::decode(payload).unwrap();
        assert_eq!(envelope.kind, FrameKind::New);

        let frame = envelope.frame().unwrap();
        assert_eq!(frame.id, "1722580000.123-abcd");
        assert_eq!(frame.camera, "yard");
        assert_eq!(frame.label, "person");
        assert_eq!(frame.sub_label, None);
        assert_eq!(frame.current_zones, vec!["lawn"]);
        assert!(frame.has_snapshot);
        assert!(!frame.has_clip);
        assert_eq!(frame.updated_at(), 1722580000.45);

        let center = frame.center().unwrap();
        assert!((center[0] - 0.50).abs() < 1e-9);
        assert!((center[1] - 0.50).abs() < 1e-9);
    }

    #[test]
    fn end_event_uses_before_state() {
        let payload = br#"{
            "type": "end",
            "before": {
                "id": "ev-9",
                "camera": "porch",
                "label": "cat",
                "start_time": 100.0,
                "frame_time": 130.0
            },
            "after": null
        }"#;
        let envelope = EventEnvelope::decode(payload).unwrap();
        assert_eq!(envelope.kind, FrameKind::End);
        assert_eq!(envelope.frame().unwrap().id, "ev-9");
    }

    #[test]
    fn sub_label_forms() {
        let as_text = br#"{"type":"update","after":{"id":"a","camera":"c","label":"person","sub_label":"amazon","start_time":1.0}}"#;
        let envelope = EventEnvelope::decode(as_text).unwrap();
        assert_eq!(envelope.frame().unwrap().sub_label.as_deref(), Some("amazon"));

        let as_pair = br#"{"type":"update","after":{"id":"a","camera":"c","label":"person","sub_label":["ups",0.87],"start_time":1.0}}"#;
        let envelope = EventEnvelope::decode(as_pair).unwrap();
        assert_eq!(envelope.frame().unwrap().sub_label.as_deref(), Some("ups"));

        let as_objects = br#"{"type":"update","after":{"id":"a","camera":"c","label":"person","sub_label":[{"subLabel":"fedex"}],"start_time":1.0}}"#;
        let envelope = EventEnvelope::decode(as_objects).unwrap();
        assert_eq!(envelope.frame().unwrap().sub_label.as_deref(), Some("fedex"));
    }

    #[test]
    fn missing_box_yields_no_center() {
        let payload = br#"{"type":"new","after":{"id":"a","camera":"c","label":"dog","start_time":5.0}}"#;
        let envelope = EventEnvelope::decode(payload).unwrap();
        let frame = envelope.frame().unwrap();
        assert!(frame.center().is_none());
        assert_eq!(frame.updated_at(), 5.0);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(EventEnvelope::decode(b"not json").is_err());
        assert!(EventEnvelope::decode(br#"{"type":"elapsed"}"#).is_err());
    }
}
