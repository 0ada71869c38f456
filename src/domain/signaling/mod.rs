//! Signaling bounded context - the engine driving the call lifecycle
//! and the heartbeat liveness inference

pub mod engine;
pub mod liveness;

pub use engine::SignalingEngine;
pub use liveness::LIVENESS_THRESHOLD_MS;
