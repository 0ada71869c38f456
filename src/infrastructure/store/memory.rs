//! In-memory call store
//!
//! A process-local adapter for the call store port: atomic multi-path
//! patches, immediate-snapshot document watches, and a collection
//! child-added/child-removed stream. Deliveries per document are in
//! commit order; the clock is manually advanceable so tests can drive
//! heartbeat skew deterministically.

use crate::config::StoreConfig;
use crate::domain::call::store::{
    CallStore, FieldWrite, StoreEvent, StoreEventSink, WatcherId, WriteValue,
};
use crate::domain::shared::error::SignalingError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallId;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

struct Watcher {
    id: WatcherId,
    sink: StoreEventSink,
}

struct Inner {
    docs: HashMap<CallId, Value>,
    doc_watchers: HashMap<CallId, Vec<Watcher>>,
    collection_watchers: Vec<Watcher>,
    next_watcher: u64,
    now_millis: i64,
}

/// In-memory store adapter
pub struct MemoryStore {
    /// Name of the one collection this adapter hosts
    collection: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_collection(StoreConfig::default().collection)
    }

    pub fn with_collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            inner: Mutex::new(Inner {
                docs: HashMap::new(),
                doc_watchers: HashMap::new(),
                collection_watchers: Vec::new(),
                next_watcher: 0,
                now_millis: Utc::now().timestamp_millis(),
            }),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Advance the store-assigned clock (testing aid)
    pub fn advance_clock(&self, millis: i64) {
        self.inner.lock().unwrap().now_millis += millis;
    }

    /// Current number of stored documents
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a document snapshot directly (testing aid)
    pub fn document(&self, call_id: &CallId) -> Option<Value> {
        self.inner.lock().unwrap().docs.get(call_id).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn next_watcher_id(&mut self) -> WatcherId {
        self.next_watcher += 1;
        WatcherId(self.next_watcher)
    }

    fn notify_document(&self, call_id: &CallId, event: &StoreEvent) {
        if let Some(watchers) = self.doc_watchers.get(call_id) {
            for watcher in watchers {
                let _ = watcher.sink.send(event.clone());
            }
        }
    }

    fn notify_collection(&self, event: &StoreEvent) {
        for watcher in &self.collection_watchers {
            let _ = watcher.sink.send(event.clone());
        }
    }

    /// Apply one path write into the document tree. Paths address
    /// existing structure; a dangling path is a write failure.
    fn apply(&self, doc: &mut Value, write: &FieldWrite) -> Result<()> {
        let resolved = match &write.value {
            WriteValue::Value(value) => value.clone(),
            WriteValue::ServerTimestamp => Value::from(self.now_millis),
        };
        let mut segments = write.path.split('/').peekable();
        let mut node = doc;
        while let Some(segment) = segments.next() {
            let object = node.as_object_mut().ok_or_else(|| {
                SignalingError::store_write(format!("path {} is not addressable", write.path))
            })?;
            if segments.peek().is_none() {
                object.insert(segment.to_string(), resolved);
                return Ok(());
            }
            node = object.get_mut(segment).ok_or_else(|| {
                SignalingError::store_write(format!("path {} does not exist", write.path))
            })?;
        }
        Err(SignalingError::store_write("empty field path"))
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn create_document(&self, call_id: &CallId, doc: Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner.docs.insert(call_id.clone(), doc.clone()).is_some();
        debug!(collection = %self.collection, call = %call_id, existed, "document created");
        inner.notify_document(
            call_id,
            &StoreEvent::DocumentChanged {
                call_id: call_id.clone(),
                doc: doc.clone(),
            },
        );
        if !existed {
            inner.notify_collection(&StoreEvent::ChildAdded {
                call_id: call_id.clone(),
                doc,
            });
        }
        Ok(())
    }

    async fn patch_document(&self, call_id: &CallId, writes: Vec<FieldWrite>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut doc = inner
            .docs
            .get(call_id)
            .cloned()
            .ok_or_else(|| SignalingError::store_write(format!("no document {}", call_id)))?;
        // all writes land on the working copy first: the patch is atomic
        for write in &writes {
            inner.apply(&mut doc, write)?;
        }
        inner.docs.insert(call_id.clone(), doc.clone());
        inner.notify_document(
            call_id,
            &StoreEvent::DocumentChanged {
                call_id: call_id.clone(),
                doc,
            },
        );
        Ok(())
    }

    async fn remove_document(&self, call_id: &CallId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.docs.remove(call_id).is_none() {
            return Ok(());
        }
        debug!(collection = %self.collection, call = %call_id, "document removed");
        inner.notify_document(
            call_id,
            &StoreEvent::DocumentRemoved {
                call_id: call_id.clone(),
            },
        );
        inner.notify_collection(&StoreEvent::ChildRemoved {
            call_id: call_id.clone(),
        });
        Ok(())
    }

    fn watch_document(&self, call_id: &CallId, sink: StoreEventSink) -> WatcherId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_watcher_id();
        // value-listener semantics: the current snapshot is delivered
        // immediately on registration
        if let Some(doc) = inner.docs.get(call_id) {
            let _ = sink.send(StoreEvent::DocumentChanged {
                call_id: call_id.clone(),
                doc: doc.clone(),
            });
        }
        inner
            .doc_watchers
            .entry(call_id.clone())
            .or_default()
            .push(Watcher { id, sink });
        id
    }

    fn unwatch_document(&self, call_id: &CallId, watcher: WatcherId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(watchers) = inner.doc_watchers.get_mut(call_id) {
            watchers.retain(|w| w.id != watcher);
            if watchers.is_empty() {
                inner.doc_watchers.remove(call_id);
            }
        }
    }

    fn watch_collection(&self, sink: StoreEventSink) -> WatcherId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_watcher_id();
        inner.collection_watchers.push(Watcher { id, sink });
        id
    }

    fn unwatch_collection(&self, watcher: WatcherId) {
        let mut inner = self.inner.lock().unwrap();
        inner.collection_watchers.retain(|w| w.id != watcher);
    }

    fn server_time_millis(&self) -> i64 {
        self.inner.lock().unwrap().now_millis
    }
}
