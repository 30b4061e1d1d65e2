use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
