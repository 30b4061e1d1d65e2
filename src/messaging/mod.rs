pub mod egress;
pub mod frame;
pub mod ingress;

pub use egress::{AlertPayload, AlertSink, MqttAlertSink};
pub use frame::{EventEnvelope, EventFrame, FrameKind};
pub use ingress::{announce_offline, connect, run_ingress};
