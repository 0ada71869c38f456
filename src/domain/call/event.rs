//! Normalized call lifecycle events
//!
//! The engine never knows about UI; it emits these events and whatever
//! owns the process wires them to screens, ringtones and the media
//! transport.

use crate::domain::call::record::{CallType, DeclineReason};
use crate::domain::shared::value_objects::{CallId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// Lifecycle event emitted by the signaling engine
///
/// For a given call ID on a given identity, at most one of Accepted /
/// Declined / Canceled / TimedOut is ever emitted - termination events
/// are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallLifecycleEvent {
    /// A remote caller is inviting the local identity
    IncomingCall {
        call_id: CallId,
        caller_id: UserId,
        call_type: CallType,
    },
    /// The callee accepted; the call is connected
    Accepted { call_id: CallId, callee_id: UserId },
    /// The callee turned the call down, explicitly or because busy
    Declined {
        call_id: CallId,
        callee_id: UserId,
        reason: DeclineReason,
    },
    /// The caller withdrew the invitation before it was answered
    Canceled { call_id: CallId, callee_id: UserId },
    /// The other party hung up a live call
    Ended { call_id: CallId, other_id: UserId },
    /// The other party went silent past the liveness threshold
    TimedOut { call_id: CallId, other_id: UserId },
}

impl CallLifecycleEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            CallLifecycleEvent::IncomingCall { call_id, .. }
            | CallLifecycleEvent::Accepted { call_id, .. }
            | CallLifecycleEvent::Declined { call_id, .. }
            | CallLifecycleEvent::Canceled { call_id, .. }
            | CallLifecycleEvent::Ended { call_id, .. }
            | CallLifecycleEvent::TimedOut { call_id, .. } => call_id,
        }
    }

    /// True for the events that resolve a call's ringing phase. For a
    /// given call on a given identity, at most one of these is ever
    /// emitted.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            CallLifecycleEvent::Accepted { .. }
                | CallLifecycleEvent::Declined { .. }
                | CallLifecycleEvent::Canceled { .. }
                | CallLifecycleEvent::TimedOut { .. }
        )
    }
}

/// Event broadcaster
///
/// Fans lifecycle events out to every subscribed sink.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<CallLifecycleEvent>,
}

impl EventBroadcaster {
    /// Create new event broadcaster with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<CallLifecycleEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast(&self, event: CallLifecycleEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if let Err(e) = self.tx.send(event) {
            warn!("Failed to broadcast lifecycle event: {}", e);
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
