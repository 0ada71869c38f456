//! Call signaling engine
//!
//! Drives the call lifecycle against the shared store: local actions
//! become atomic document writes, peer-driven transitions arrive as
//! push deliveries and are re-derived into at most one normalized
//! lifecycle event each. There is no central arbiter; both parties must
//! converge on the same outcome from the document state alone.
//!
//! All store callbacks funnel into one single-consumer queue, so no two
//! handlers ever run concurrently against the engine's local state.

use crate::config::SignalingConfig;
use crate::domain::call::event::{CallLifecycleEvent, EventBroadcaster};
use crate::domain::call::record::{CallRecord, CallStatus, CallType, DeclineReason, ParticipantStatus};
use crate::domain::call::repository::CallRecordRepository;
use crate::domain::call::store::{CallStore, StoreEvent, StoreEventSink, WatcherId};
use crate::domain::shared::error::SignalingError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use crate::domain::signaling::liveness;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// The signaling state machine for one identity session
///
/// Explicitly constructed and injected into whatever owns the process
/// lifetime; tests instantiate fresh engines per case.
pub struct SignalingEngine {
    config: SignalingConfig,
    identity: Option<UserId>,
    repository: CallRecordRepository,
    events: EventBroadcaster,
    store_tx: StoreEventSink,
    store_rx: mpsc::UnboundedReceiver<StoreEvent>,
    collection_watcher: Option<WatcherId>,
}

impl SignalingEngine {
    pub fn new(store: Arc<dyn CallStore>, config: SignalingConfig) -> Self {
        let (store_tx, store_rx) = mpsc::unbounded_channel();
        Self {
            config,
            identity: None,
            repository: CallRecordRepository::new(store),
            events: EventBroadcaster::default(),
            store_tx,
            store_rx,
            collection_watcher: None,
        }
    }

    /// Subscribe to the normalized lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallLifecycleEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.repository.is_idle()
    }

    pub fn active_call(&self) -> Option<&CallRecord> {
        self.repository.active()
    }

    /// The identity provider reports a sign-in: drop all call tracking
    /// and (re)subscribe to the collection stream.
    pub fn sign_in(&mut self, identity: UserId) {
        info!(user = %identity, "signing in");
        self.repository.clear();
        if let Some(watcher) = self.collection_watcher.take() {
            self.repository.store().unwatch_collection(watcher);
        }
        let watcher = self
            .repository
            .store()
            .watch_collection(self.store_tx.clone());
        self.collection_watcher = Some(watcher);
        self.identity = Some(identity);
    }

    /// The identity provider reports a sign-out: no further local
    /// actions will be taken, so tear everything down.
    pub fn sign_out(&mut self) {
        if let Some(user) = &self.identity {
            info!(user = %user, "signing out");
        }
        if let Some(watcher) = self.collection_watcher.take() {
            self.repository.store().unwatch_collection(watcher);
        }
        self.repository.clear();
        self.identity = None;
    }

    fn require_identity(&self) -> Result<UserId> {
        self.identity.clone().ok_or(SignalingError::NotSignedIn)
    }

    /// Start a call to the given users
    ///
    /// Creates the call record with everyone Waiting. The subscription
    /// and the active slot are registered up front and torn down again
    /// if the create write fails, so a failed start leaves no orphaned
    /// listener.
    pub async fn start_call(
        &mut self,
        callees: &[UserId],
        call_type: CallType,
    ) -> Result<CallId> {
        let self_id = self.require_identity()?;
        if !self.repository.is_idle() {
            return Err(SignalingError::precondition("already in a live call"));
        }
        if callees.is_empty() {
            return Err(SignalingError::precondition("no callees given"));
        }

        let call_id = CallId::generate();
        let start_time = self.repository.store().server_time_millis();
        let record = CallRecord::outgoing(call_id.clone(), call_type, self_id, callees, start_time);

        self.repository.set_active(record.clone());
        self.repository
            .subscribe_to_call(&call_id, self.store_tx.clone());

        match self.repository.create(&record).await {
            Ok(()) => {
                info!(call = %call_id, ?call_type, "call started");
                Ok(call_id)
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "call create failed, tearing down");
                self.repository.unsubscribe_from_call(&call_id);
                self.repository.clear_active(&call_id);
                Err(e)
            }
        }
    }

    /// Accept the pending incoming call
    pub async fn accept_call(&mut self) -> Result<()> {
        let self_id = self.require_identity()?;
        let pending = self.pending_incoming(&self_id)?;
        let PendingIncoming { call_id, caller_id } = pending;

        self.repository
            .patch_accept(&call_id, &self_id, &caller_id)
            .await?;
        info!(call = %call_id, "call accepted");
        Ok(())
    }

    /// Decline the pending incoming call
    pub async fn decline_call(&mut self, reason: DeclineReason) -> Result<()> {
        let self_id = self.require_identity()?;
        let PendingIncoming { call_id, caller_id } = self.pending_incoming(&self_id)?;

        let result = self
            .repository
            .patch_decline(&call_id, &self_id, &caller_id, reason)
            .await;
        // the decliner initiated the outcome; it is not re-notified
        self.teardown(&call_id);
        if result.is_ok() {
            info!(call = %call_id, ?reason, "call declined");
        }
        result
    }

    /// Withdraw an outgoing call before the callee answered
    pub async fn cancel_call(&mut self) -> Result<()> {
        let self_id = self.require_identity()?;
        let record = self
            .repository
            .active()
            .ok_or_else(|| SignalingError::precondition("no active call"))?;
        if !record.is_caller(&self_id) {
            return Err(SignalingError::precondition("only the caller may cancel"));
        }
        let own_status = record
            .participant(&self_id)
            .map(|u| u.status)
            .unwrap_or(ParticipantStatus::Waiting);
        if !record.is_live() || own_status != ParticipantStatus::Waiting {
            return Err(SignalingError::precondition("call is not waiting"));
        }
        let callee_id = record
            .receiver()
            .map(|u| u.user_id.clone())
            .ok_or_else(|| SignalingError::MalformedRecord("record has no callee".into()))?;
        let call_id = record.call_id.clone();

        let result = self
            .repository
            .patch_cancel(&call_id, &self_id, &callee_id)
            .await;
        self.teardown(&call_id);
        if result.is_ok() {
            info!(call = %call_id, "call canceled");
            self.emit(CallLifecycleEvent::Canceled { call_id, callee_id });
        }
        result
    }

    /// Hang up the live call
    pub async fn end_call(&mut self) -> Result<()> {
        let self_id = self.require_identity()?;
        let record = self
            .repository
            .active()
            .ok_or_else(|| SignalingError::precondition("no active call"))?;
        if !record.is_live() {
            return Err(SignalingError::precondition("call already finished"));
        }
        let call_id = record.call_id.clone();

        let result = self.repository.patch_finish(&call_id, &self_id).await;
        self.teardown(&call_id);
        if result.is_ok() {
            info!(call = %call_id, "call ended");
        }
        result
    }

    /// Refresh the local participant's liveness timestamp. The tick
    /// interval is owned by the caller of the engine.
    pub async fn send_heartbeat(&mut self) -> Result<()> {
        let self_id = self.require_identity()?;
        let record = self
            .repository
            .active()
            .filter(|r| r.is_live())
            .ok_or_else(|| SignalingError::precondition("no live call"))?;
        let call_id = record.call_id.clone();
        self.repository.patch_heartbeat(&call_id, &self_id).await
    }

    /// Process every store notification currently queued
    ///
    /// Writes issued while handling (busy declines) queue their own
    /// echoes, which the same pass picks up.
    pub async fn pump(&mut self) {
        while let Ok(event) = self.store_rx.try_recv() {
            self.handle_store_event(event).await;
        }
    }

    /// Handle one store notification
    pub async fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::ChildAdded { call_id, doc } => self.on_child_added(call_id, doc).await,
            StoreEvent::DocumentChanged { call_id, doc } => {
                // a delivery racing an unsubscribe is dropped as a no-op
                if self.repository.is_subscribed(&call_id) {
                    self.on_document_changed(call_id, doc).await;
                } else {
                    debug!(call = %call_id, "delivery for unwatched call dropped");
                }
            }
            StoreEvent::DocumentRemoved { call_id } | StoreEvent::ChildRemoved { call_id } => {
                self.on_removed(call_id);
            }
        }
    }

    /// A new record appeared in the collection
    ///
    /// The busy check runs before the am-I-caller check; only the
    /// already-tracked own call is exempt from auto-decline.
    async fn on_child_added(&mut self, call_id: CallId, doc: Value) {
        let self_id = match &self.identity {
            Some(id) => id.clone(),
            None => return,
        };
        let record = match CallRecordRepository::parse(&doc) {
            Ok(record) => record,
            Err(e) => {
                warn!(call = %call_id, error = %e, "dropping malformed record");
                return;
            }
        };
        if !record.contains(&self_id) || !record.is_live() {
            return;
        }

        if let Some(active) = self.repository.active() {
            if active.call_id == call_id {
                return;
            }
            // already in a live call: resolve the glare with a busy
            // decline instead of surfacing an incoming-call event
            let caller_id = match record.participant(&self_id) {
                Some(user) => user.caller_id.clone(),
                None => return,
            };
            info!(call = %call_id, "busy, auto-declining");
            if let Err(e) = self
                .repository
                .patch_decline(&call_id, &self_id, &caller_id, DeclineReason::Busy)
                .await
            {
                warn!(call = %call_id, error = %e, "busy decline write failed");
            }
            return;
        }

        if record.is_caller(&self_id) {
            // our own create; the start-call path already tracks it
            return;
        }
        // idle callee: watch the record, the initial snapshot delivery
        // classifies into incoming-call
        self.repository
            .subscribe_to_call(&call_id, self.store_tx.clone());
    }

    /// A watched record reached a new committed state
    ///
    /// A delivery for a call other than the tracked live one never
    /// replaces the active slot; it is glare left over from a
    /// subscription that raced the first ring, and is resolved with a
    /// busy decline like any other overlapping invitation.
    async fn on_document_changed(&mut self, call_id: CallId, doc: Value) {
        let self_id = match &self.identity {
            Some(id) => id.clone(),
            None => return,
        };
        let record = match CallRecordRepository::parse(&doc) {
            Ok(record) => record,
            Err(e) => {
                warn!(call = %call_id, error = %e, "dropping malformed record");
                return;
            }
        };

        let glare = self
            .repository
            .active()
            .map(|active| active.call_id != call_id && active.is_live())
            .unwrap_or(false);
        if glare {
            self.repository.unsubscribe_from_call(&call_id);
            if record.is_live() && !record.is_caller(&self_id) {
                if let Some(own) = record.participant(&self_id) {
                    let caller_id = own.caller_id.clone();
                    info!(call = %call_id, "busy, auto-declining");
                    if let Err(e) = self
                        .repository
                        .patch_decline(&call_id, &self_id, &caller_id, DeclineReason::Busy)
                        .await
                    {
                        warn!(call = %call_id, error = %e, "busy decline write failed");
                    }
                }
            }
            return;
        }

        let previous = self
            .repository
            .active()
            .filter(|r| r.call_id == call_id)
            .cloned();
        self.repository.set_active(record.clone());

        let (caller, receiver) = match (record.caller(), record.receiver()) {
            (Some(caller), Some(receiver)) => (caller.clone(), receiver.clone()),
            _ => {
                warn!(call = %call_id, "record is missing its caller/receiver pair");
                return;
            }
        };
        let other_id = if caller.user_id == self_id {
            receiver.user_id.clone()
        } else {
            caller.user_id.clone()
        };

        if let Some(previous) = &previous {
            if record.same_statuses_as(previous) {
                // nothing but heartbeat refreshes: check liveness
                if liveness::is_stale(&caller, &receiver, self.config.liveness_threshold_ms) {
                    info!(call = %call_id, other = %other_id, "peer heartbeat stale, call timed out");
                    self.teardown(&call_id);
                    self.emit(CallLifecycleEvent::TimedOut { call_id, other_id });
                }
                return;
            }
        }

        if record.call_status == CallStatus::Finished {
            let event = if caller.status == ParticipantStatus::Finished
                || receiver.status == ParticipantStatus::Finished
            {
                // the operator side already dropped its own listener, so
                // this delivery means the other party ended the call
                Some(CallLifecycleEvent::Ended { call_id: call_id.clone(), other_id })
            } else {
                match caller.status {
                    ParticipantStatus::Declined => Some(CallLifecycleEvent::Declined {
                        call_id: call_id.clone(),
                        callee_id: receiver.user_id.clone(),
                        reason: DeclineReason::Declined,
                    }),
                    ParticipantStatus::Busy => Some(CallLifecycleEvent::Declined {
                        call_id: call_id.clone(),
                        callee_id: receiver.user_id.clone(),
                        reason: DeclineReason::Busy,
                    }),
                    ParticipantStatus::Canceled => Some(CallLifecycleEvent::Canceled {
                        call_id: call_id.clone(),
                        callee_id: receiver.user_id.clone(),
                    }),
                    _ => None,
                }
            };
            self.teardown(&call_id);
            if let Some(event) = event {
                self.emit(event);
            }
            return;
        }

        // still live
        if receiver.status == ParticipantStatus::Connected {
            self.emit(CallLifecycleEvent::Accepted {
                call_id,
                callee_id: receiver.user_id.clone(),
            });
        } else if receiver.status == ParticipantStatus::Waiting
            && previous.is_none()
            && receiver.user_id == self_id
        {
            // very first delivery on the callee side
            self.emit(CallLifecycleEvent::IncomingCall {
                call_id,
                caller_id: caller.user_id.clone(),
                call_type: record.call_type,
            });
        }
    }

    /// The record document disappeared from the store: an out-of-band
    /// Finished, classified from the last cached state.
    fn on_removed(&mut self, call_id: CallId) {
        let self_id = match &self.identity {
            Some(id) => id.clone(),
            None => return,
        };
        if !self.repository.is_active_call(&call_id) {
            self.repository.unsubscribe_from_call(&call_id);
            return;
        }
        let record = self.repository.active().cloned();
        self.teardown(&call_id);

        let record = match record {
            Some(record) => record,
            None => return,
        };
        let (caller, receiver) = match (record.caller(), record.receiver()) {
            (Some(caller), Some(receiver)) => (caller, receiver),
            _ => return,
        };
        let event = if record.call_status == CallStatus::Waiting {
            if caller.user_id == self_id {
                CallLifecycleEvent::Declined {
                    call_id,
                    callee_id: receiver.user_id.clone(),
                    reason: DeclineReason::Declined,
                }
            } else {
                CallLifecycleEvent::Canceled {
                    call_id,
                    callee_id: receiver.user_id.clone(),
                }
            }
        } else {
            let other_id = if caller.user_id == self_id {
                receiver.user_id.clone()
            } else {
                caller.user_id.clone()
            };
            CallLifecycleEvent::Ended { call_id, other_id }
        };
        self.emit(event);
    }

    /// Fetch the record the local identity may accept or decline
    fn pending_incoming(&self, self_id: &UserId) -> Result<PendingIncoming> {
        let record = self
            .repository
            .active()
            .ok_or_else(|| SignalingError::precondition("no incoming call"))?;
        if !record.is_live() {
            return Err(SignalingError::precondition("call is not waiting"));
        }
        if record.is_caller(self_id) {
            return Err(SignalingError::precondition(
                "the caller cannot answer its own call",
            ));
        }
        let own = record
            .participant(self_id)
            .ok_or_else(|| SignalingError::precondition("not a participant of this call"))?;
        if own.status != ParticipantStatus::Waiting {
            return Err(SignalingError::precondition("call is not waiting"));
        }
        Ok(PendingIncoming {
            call_id: record.call_id.clone(),
            caller_id: own.caller_id.clone(),
        })
    }

    /// Drop the subscription and the active slot for a terminal call
    fn teardown(&mut self, call_id: &CallId) {
        self.repository.unsubscribe_from_call(call_id);
        self.repository.clear_active(call_id);
    }

    fn emit(&self, event: CallLifecycleEvent) {
        debug!(?event, "emitting lifecycle event");
        self.events.broadcast(event);
    }
}

struct PendingIncoming {
    call_id: CallId,
    caller_id: UserId,
}
