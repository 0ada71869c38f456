//! Call record repository
//!
//! Owns the authoritative local view of "what call am I in": the
//! active-call slot, the per-call subscription map, and every store
//! read/write issued on behalf of the engine.

use crate::domain::call::record::{CallRecord, CallStatus, DeclineReason, ParticipantStatus};
use crate::domain::call::store::{paths, CallStore, FieldWrite, StoreEventSink, WatcherId};
use crate::domain::shared::error::SignalingError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Local bookkeeping and store mediation for call records
///
/// The local identity is party to at most one live record at any
/// instant; this is enforced here, not by the store.
pub struct CallRecordRepository {
    store: Arc<dyn CallStore>,
    /// The single call this identity currently considers itself part of
    active: Option<CallRecord>,
    /// One change listener per call identifier
    subscriptions: HashMap<CallId, WatcherId>,
}

impl CallRecordRepository {
    pub fn new(store: Arc<dyn CallStore>) -> Self {
        Self {
            store,
            active: None,
            subscriptions: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.store
    }

    /// Deserialize a delivered document into a call record
    pub fn parse(doc: &Value) -> Result<CallRecord> {
        serde_json::from_value(doc.clone())
            .map_err(|e| SignalingError::MalformedRecord(e.to_string()))
    }

    /// Write a brand-new call record (caller-only operation)
    pub async fn create(&self, record: &CallRecord) -> Result<()> {
        let doc = serde_json::to_value(record)
            .map_err(|e| SignalingError::MalformedRecord(e.to_string()))?;
        self.store.create_document(&record.call_id, doc).await
    }

    /// Atomic partial update against one call document
    pub async fn patch(&self, call_id: &CallId, writes: Vec<FieldWrite>) -> Result<()> {
        self.store.patch_document(call_id, writes).await
    }

    /// Accept: the whole pair goes Connected, connected_time set once
    pub async fn patch_accept(
        &self,
        call_id: &CallId,
        self_id: &UserId,
        caller_id: &UserId,
    ) -> Result<()> {
        let status = serde_json::to_value(ParticipantStatus::Connected).unwrap();
        self.patch(
            call_id,
            vec![
                FieldWrite::value(
                    paths::CALL_STATUS,
                    serde_json::to_value(CallStatus::Connected).unwrap(),
                ),
                FieldWrite::value(paths::status(self_id), status.clone()),
                FieldWrite::value(paths::status(caller_id), status),
                FieldWrite::server_timestamp(paths::connected_time(self_id)),
                FieldWrite::server_timestamp(paths::connected_time(caller_id)),
            ],
        )
        .await
    }

    /// Decline or busy-decline: both sides carry the decline status
    pub async fn patch_decline(
        &self,
        call_id: &CallId,
        self_id: &UserId,
        caller_id: &UserId,
        reason: DeclineReason,
    ) -> Result<()> {
        let status = serde_json::to_value(reason.as_participant_status()).unwrap();
        self.patch(
            call_id,
            vec![
                FieldWrite::value(
                    paths::CALL_STATUS,
                    serde_json::to_value(CallStatus::Finished).unwrap(),
                ),
                FieldWrite::value(paths::status(self_id), status.clone()),
                FieldWrite::value(paths::status(caller_id), status),
            ],
        )
        .await
    }

    /// Cancel: caller withdraws before the callee answered
    pub async fn patch_cancel(
        &self,
        call_id: &CallId,
        self_id: &UserId,
        callee_id: &UserId,
    ) -> Result<()> {
        let status = serde_json::to_value(ParticipantStatus::Canceled).unwrap();
        self.patch(
            call_id,
            vec![
                FieldWrite::value(
                    paths::CALL_STATUS,
                    serde_json::to_value(CallStatus::Finished).unwrap(),
                ),
                FieldWrite::value(paths::status(self_id), status.clone()),
                FieldWrite::value(paths::status(callee_id), status),
            ],
        )
        .await
    }

    /// End a live call
    ///
    /// When the call being ended is the tracked active call, every
    /// participant is marked Finished; otherwise only self is updated
    /// and the remote party independently ends its own side.
    pub async fn patch_finish(&self, call_id: &CallId, self_id: &UserId) -> Result<()> {
        let status = serde_json::to_value(ParticipantStatus::Finished).unwrap();
        let mut writes = vec![FieldWrite::value(
            paths::CALL_STATUS,
            serde_json::to_value(CallStatus::Finished).unwrap(),
        )];
        match self.active.as_ref().filter(|r| &r.call_id == call_id) {
            Some(record) => {
                for user in record.users.values() {
                    writes.push(FieldWrite::value(
                        paths::status(&user.user_id),
                        status.clone(),
                    ));
                    writes.push(FieldWrite::server_timestamp(paths::finish_time(
                        &user.user_id,
                    )));
                }
            }
            None => {
                writes.push(FieldWrite::value(paths::status(self_id), status));
                writes.push(FieldWrite::server_timestamp(paths::finish_time(self_id)));
            }
        }
        self.patch(call_id, writes).await
    }

    /// Refresh this participant's liveness timestamp
    pub async fn patch_heartbeat(&self, call_id: &CallId, self_id: &UserId) -> Result<()> {
        self.patch(
            call_id,
            vec![FieldWrite::server_timestamp(paths::heartbeat_time(self_id))],
        )
        .await
    }

    /// Register exactly one change listener for the call. A second call
    /// for the same identifier while one is active is a no-op.
    pub fn subscribe_to_call(&mut self, call_id: &CallId, sink: StoreEventSink) {
        if self.subscriptions.contains_key(call_id) {
            return;
        }
        let watcher = self.store.watch_document(call_id, sink);
        self.subscriptions.insert(call_id.clone(), watcher);
    }

    /// Drop the call's change listener. Idempotent.
    pub fn unsubscribe_from_call(&mut self, call_id: &CallId) {
        if let Some(watcher) = self.subscriptions.remove(call_id) {
            self.store.unwatch_document(call_id, watcher);
        }
    }

    pub fn is_subscribed(&self, call_id: &CallId) -> bool {
        self.subscriptions.contains_key(call_id)
    }

    /// Track this record as the active call. A different still-live
    /// record is discarded without notifying anyone; only the engine
    /// decides whether that implies a transition.
    pub fn set_active(&mut self, record: CallRecord) {
        if let Some(current) = &self.active {
            if current.call_id != record.call_id && current.is_live() {
                debug!(
                    old = %current.call_id,
                    new = %record.call_id,
                    "discarding tracked live call"
                );
            }
        }
        self.active = Some(record);
    }

    /// Drop the active slot if it tracks the given call
    pub fn clear_active(&mut self, call_id: &CallId) {
        if self.active.as_ref().map(|r| &r.call_id) == Some(call_id) {
            self.active = None;
        }
    }

    pub fn active(&self) -> Option<&CallRecord> {
        self.active.as_ref()
    }

    pub fn is_active_call(&self, call_id: &CallId) -> bool {
        self.active.as_ref().map(|r| &r.call_id) == Some(call_id)
    }

    /// True iff no active record is tracked
    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    /// Drop all local tracking and listeners (identity change)
    pub fn clear(&mut self) {
        self.active = None;
        let subscriptions = std::mem::take(&mut self.subscriptions);
        for (call_id, watcher) in subscriptions {
            self.store.unwatch_document(&call_id, watcher);
        }
    }
}
