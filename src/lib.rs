pub mod config;
pub mod engine;
pub mod error;
pub mod frigate;
pub mod messaging;

// Re-export main components for easier use
pub use engine::{AdmissionEngine, Clock, EngineMsg, RuleSet};
pub use error::Error;
