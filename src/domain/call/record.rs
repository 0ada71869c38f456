//! Call record - the shared document representing one call's full state
//!
//! One record exists per call, keyed by call ID, jointly written by the
//! caller and the callee through atomic multi-path patches.

use crate::domain::shared::value_objects::{CallId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of media the call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

/// Record-level call status
///
/// Monotonic: Waiting -> Connected -> Finished, or Waiting -> Finished
/// directly when the call is declined or canceled before accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Waiting,
    Connected,
    Finished,
}

impl CallStatus {
    /// Check if the record-level status transition is valid
    pub fn can_transition_to(&self, new_status: CallStatus) -> bool {
        use CallStatus::*;

        matches!(
            (self, new_status),
            (Waiting, Connected) | (Waiting, Finished) | (Connected, Finished)
        )
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, CallStatus::Finished)
    }
}

/// Per-participant status
///
/// Finer-grained than the record-level status: it encodes why the call
/// ended for that participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Waiting,
    Connected,
    Finished,
    Declined,
    Canceled,
    Busy,
    TimedOutWaiting,
    TimedOutConnected,
}

/// Why a callee turned the call down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclineReason {
    /// The callee explicitly declined
    Declined,
    /// The callee was already in a live call
    Busy,
}

impl DeclineReason {
    pub fn as_participant_status(&self) -> ParticipantStatus {
        match self {
            DeclineReason::Declined => ParticipantStatus::Declined,
            DeclineReason::Busy => ParticipantStatus::Busy,
        }
    }
}

/// One participant's status and timestamps within a call record
///
/// All timestamps are store-assigned epoch milliseconds, 0 until reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParticipant {
    pub user_id: UserId,
    /// Identifier of whoever initiated the call, stored redundantly on
    /// every participant so each can determine its role locally.
    pub caller_id: UserId,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub finish_time: i64,
    #[serde(default)]
    pub connected_time: i64,
    #[serde(default)]
    pub heartbeat_time: i64,
    pub status: ParticipantStatus,
}

impl CallParticipant {
    pub fn new(user_id: UserId, caller_id: UserId, start_time: i64) -> Self {
        Self {
            user_id,
            caller_id,
            start_time,
            finish_time: 0,
            connected_time: 0,
            heartbeat_time: 0,
            status: ParticipantStatus::Waiting,
        }
    }

    pub fn is_caller(&self) -> bool {
        self.user_id == self.caller_id
    }
}

/// The shared call document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: CallId,
    pub call_type: CallType,
    pub call_status: CallStatus,
    pub users: HashMap<UserId, CallParticipant>,
}

impl CallRecord {
    /// Build a brand-new record for an outgoing call, everyone Waiting
    pub fn outgoing(
        call_id: CallId,
        call_type: CallType,
        caller: UserId,
        callees: &[UserId],
        start_time: i64,
    ) -> Self {
        let mut users = HashMap::new();
        users.insert(
            caller.clone(),
            CallParticipant::new(caller.clone(), caller.clone(), start_time),
        );
        for callee in callees {
            users.insert(
                callee.clone(),
                CallParticipant::new(callee.clone(), caller.clone(), start_time),
            );
        }
        Self {
            call_id,
            call_type,
            call_status: CallStatus::Waiting,
            users,
        }
    }

    pub fn participant(&self, user_id: &UserId) -> Option<&CallParticipant> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn is_live(&self) -> bool {
        self.call_status.is_live()
    }

    /// The participant whose user_id equals caller_id
    pub fn caller(&self) -> Option<&CallParticipant> {
        self.users.values().find(|u| u.is_caller())
    }

    /// The other side of the pair; the protocol assumes exactly one
    /// caller and one callee.
    pub fn receiver(&self) -> Option<&CallParticipant> {
        self.users.values().find(|u| !u.is_caller())
    }

    pub fn is_caller(&self, user_id: &UserId) -> bool {
        self.participant(user_id).map(|u| u.is_caller()).unwrap_or(false)
    }

    /// The participant opposite the given one
    pub fn other_party(&self, user_id: &UserId) -> Option<&CallParticipant> {
        self.users.values().find(|u| &u.user_id != user_id)
    }

    /// True when neither the record-level status nor either pair
    /// member's status differs from `previous` - i.e. the delivery
    /// carried nothing but heartbeat refreshes.
    pub fn same_statuses_as(&self, previous: &CallRecord) -> bool {
        if self.call_status != previous.call_status {
            return false;
        }
        let pair = [self.caller(), self.receiver()];
        pair.iter().flatten().all(|now| {
            previous
                .participant(&now.user_id)
                .map(|before| before.status == now.status)
                .unwrap_or(false)
        })
    }
}
