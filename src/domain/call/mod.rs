//! Call bounded context - the shared record, its store port, and the
//! local repository that tracks what call this identity is in

pub mod event;
pub mod record;
pub mod repository;
pub mod store;

pub use event::{CallLifecycleEvent, EventBroadcaster};
pub use record::{
    CallParticipant, CallRecord, CallStatus, CallType, DeclineReason, ParticipantStatus,
};
pub use repository::CallRecordRepository;
pub use store::{CallStore, FieldWrite, StoreEvent, StoreEventSink, WatcherId, WriteValue};
