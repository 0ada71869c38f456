//! Call store port
//!
//! The shared call store is a remote, replicated, key-addressed document
//! database: atomic multi-path patches, whole-document replace, and push
//! subscriptions per document and per collection. This trait is the port
//! the domain owns; adapters live in the infrastructure layer.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, UserId};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Handle for a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub u64);

/// Change notification pushed by the store
///
/// Per-document deliveries are ordered as committed (possibly coalesced
/// into the latest cumulative state); no ordering holds between the
/// collection stream and any per-document stream.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A watched document reached a new committed state
    DocumentChanged { call_id: CallId, doc: Value },
    /// A watched document was removed from the store
    DocumentRemoved { call_id: CallId },
    /// A new document appeared in the call collection
    ChildAdded { call_id: CallId, doc: Value },
    /// A document disappeared from the call collection
    ChildRemoved { call_id: CallId },
}

/// Where a subscription delivers its notifications
pub type StoreEventSink = mpsc::UnboundedSender<StoreEvent>;

/// Value side of a single patched field
#[derive(Debug, Clone)]
pub enum WriteValue {
    Value(Value),
    /// Resolved to the store's own clock at commit time
    ServerTimestamp,
}

/// One path/value pair within an atomic patch
#[derive(Debug, Clone)]
pub struct FieldWrite {
    pub path: String,
    pub value: WriteValue,
}

impl FieldWrite {
    pub fn value(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value: WriteValue::Value(value),
        }
    }

    pub fn server_timestamp(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: WriteValue::ServerTimestamp,
        }
    }
}

/// Field paths within a call document
pub mod paths {
    use super::UserId;

    pub const CALL_STATUS: &str = "call_status";

    pub fn status(user_id: &UserId) -> String {
        format!("users/{}/status", user_id)
    }

    pub fn heartbeat_time(user_id: &UserId) -> String {
        format!("users/{}/heartbeat_time", user_id)
    }

    pub fn connected_time(user_id: &UserId) -> String {
        format!("users/{}/connected_time", user_id)
    }

    pub fn finish_time(user_id: &UserId) -> String {
        format!("users/{}/finish_time", user_id)
    }
}

/// Port to the shared call store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Write a brand-new document. Replaces any existing document with
    /// the same key.
    async fn create_document(&self, call_id: &CallId, doc: Value) -> Result<()>;

    /// Atomic multi-path partial update. Either every write applies or
    /// none does; patching a missing document fails.
    async fn patch_document(&self, call_id: &CallId, writes: Vec<FieldWrite>) -> Result<()>;

    /// Remove a document entirely
    async fn remove_document(&self, call_id: &CallId) -> Result<()>;

    /// Watch one document. The current snapshot, if any, is delivered
    /// immediately; later committed states follow in order.
    fn watch_document(&self, call_id: &CallId, sink: StoreEventSink) -> WatcherId;

    /// Stop a document watch. Idempotent.
    fn unwatch_document(&self, call_id: &CallId, watcher: WatcherId);

    /// Watch the call collection for added/removed children
    fn watch_collection(&self, sink: StoreEventSink) -> WatcherId;

    /// Stop a collection watch. Idempotent.
    fn unwatch_collection(&self, watcher: WatcherId);

    /// The store-assigned clock, epoch milliseconds
    fn server_time_millis(&self) -> i64;
}
