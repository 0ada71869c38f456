//! Heartbeat-based liveness inference
//!
//! Each participant refreshes its heartbeat timestamp while a call is
//! live. When the two sides' timestamps drift apart beyond the
//! threshold, the peer that notices declares the other silently failed.
//! This is a purely local inference - no store write accompanies it, so
//! the two clients need not agree on exactly who noticed first.

use crate::domain::call::record::CallParticipant;

/// Skew beyond which a peer is presumed silently disconnected
pub const LIVENESS_THRESHOLD_MS: i64 = 60_000;

/// Absolute heartbeat skew between the pair, or None while either side
/// has never heartbeat (timestamps start at 0).
pub fn heartbeat_skew(caller: &CallParticipant, receiver: &CallParticipant) -> Option<i64> {
    if caller.heartbeat_time == 0 || receiver.heartbeat_time == 0 {
        return None;
    }
    Some((caller.heartbeat_time - receiver.heartbeat_time).abs())
}

/// True when the pair's heartbeat skew exceeds the threshold
pub fn is_stale(caller: &CallParticipant, receiver: &CallParticipant, threshold_ms: i64) -> bool {
    heartbeat_skew(caller, receiver)
        .map(|skew| skew > threshold_ms)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::value_objects::UserId;

    fn participant(user: &str, heartbeat: i64) -> CallParticipant {
        let mut p = CallParticipant::new(UserId::from(user), UserId::from("alice"), 0);
        p.heartbeat_time = heartbeat;
        p
    }

    #[test]
    fn test_skew_requires_both_heartbeats() {
        let caller = participant("alice", 10_000);
        let silent = participant("bob", 0);
        assert_eq!(heartbeat_skew(&caller, &silent), None);
        assert!(!is_stale(&caller, &silent, LIVENESS_THRESHOLD_MS));
    }

    #[test]
    fn test_skew_is_absolute() {
        let caller = participant("alice", 10_000);
        let receiver = participant("bob", 25_000);
        assert_eq!(heartbeat_skew(&caller, &receiver), Some(15_000));
        assert_eq!(heartbeat_skew(&receiver, &caller), Some(15_000));
    }

    #[test]
    fn test_stale_only_past_threshold() {
        let caller = participant("alice", 100_000);
        let exactly = participant("bob", 160_000);
        assert!(!is_stale(&caller, &exactly, LIVENESS_THRESHOLD_MS));

        let past = participant("bob", 160_001);
        assert!(is_stale(&caller, &past, LIVENESS_THRESHOLD_MS));
    }
}
