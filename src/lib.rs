//! Holler - store-mediated call signaling core
//!
//! A two-party call lifecycle (start, accept, decline, cancel, end,
//! heartbeat liveness) coordinated entirely through a shared,
//! eventually-consistent document store that pushes change
//! notifications to subscribed clients. Each party runs its own
//! [`SignalingEngine`](domain::signaling::SignalingEngine); the store
//! document is the only shared state.

pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::call::{
    CallLifecycleEvent, CallRecord, CallStatus, CallStore, CallType, DeclineReason,
    ParticipantStatus, StoreEvent,
};
pub use domain::shared::error::SignalingError;
pub use domain::shared::result::Result;
pub use domain::shared::value_objects::{CallId, UserId};
pub use domain::signaling::SignalingEngine;
