//! Event types
//!
//! An [`Event`] is an immutable fact read back from the log. Its payload is
//! the deserialized domain value, kept behind a type-erased [`Payload`] so
//! that pages can carry events of many registered types side by side.

use crate::types::StreamKey;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Deserialized event payload
///
/// Holds both the typed value (for downcasting to the registered type) and
/// the intermediate JSON document it was decoded from.
#[derive(Clone)]
pub struct Payload {
    descriptor: Arc<str>,
    document: serde_json::Value,
    value: Arc<dyn Any + Send + Sync>,
}

impl Payload {
    /// Wrap a decoded value
    pub fn new<T>(descriptor: impl Into<Arc<str>>, document: serde_json::Value, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            descriptor: descriptor.into(),
            document,
            value: Arc::new(value),
        }
    }

    /// Fully-qualified descriptor of the payload type
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The payload as a JSON document
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// Borrow the payload as its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Check the concrete payload type
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("descriptor", &self.descriptor)
            .field("document", &self.document)
            .finish()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.document == other.document
    }
}

/// An event in the log
///
/// Events are immutable records. Each event includes:
/// - A globally unique sequence number (allocation order, not commit order)
/// - The owning stream and the 1-based version within that stream
/// - The registered type alias and the deserialized payload
/// - Commit timestamp and optional tenant
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Global sequence number
    pub sequence: u64,
    /// Owning stream
    pub stream: StreamKey,
    /// Position within the owning stream, starting at 1
    pub version: u64,
    /// Registered alias of the payload type
    pub type_name: String,
    /// Deserialized payload
    pub data: Payload,
    /// Commit time assigned by the store
    pub timestamp: DateTime<Utc>,
    /// Optional partition key
    pub tenant_id: Option<String>,
}

impl Event {
    /// Borrow the payload as its concrete type
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

/// An encoded event waiting to be appended
///
/// Produced by [`EventGraph::encode`](crate::graph::EventGraph::encode);
/// sequence, version and commit time are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// Registered alias of the payload type
    pub type_name: String,
    /// Fully-qualified type descriptor, recorded as the fallback
    pub type_descriptor: String,
    /// Serialized payload
    pub data: Vec<u8>,
}

/// Events sharing one stream, ordered by version
///
/// Built only for presentation and debugging; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream {
    /// Stream identifier
    pub id: StreamKey,
    /// Events of this stream in version order
    pub events: Vec<Event>,
}

impl EventStream {
    /// Group events by stream
    ///
    /// Streams appear in the order their first event appears in the input.
    /// Within a stream, events are sorted by version.
    pub fn group<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<EventStream> {
        let mut positions: HashMap<&StreamKey, usize> = HashMap::new();
        let mut streams: Vec<EventStream> = Vec::new();

        for event in events {
            match positions.get(&event.stream) {
                Some(&index) => streams[index].events.push(event.clone()),
                None => {
                    positions.insert(&event.stream, streams.len());
                    streams.push(EventStream {
                        id: event.stream.clone(),
                        events: vec![event.clone()],
                    });
                }
            }
        }

        for stream in &mut streams {
            stream.events.sort_by_key(|e| e.version);
        }
        streams
    }

    /// Highest version in this stream slice
    pub fn last_version(&self) -> Option<u64> {
        self.events.last().map(|e| e.version)
    }
}
