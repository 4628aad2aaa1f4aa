//! Event row resolver
//!
//! Turns one row of the events table into a typed [`Event`]. The two
//! selectors differ only in how the `stream_id` column is read; which one is
//! used is decided once, from the store's [`StreamIdentity`], by
//! [`selector_for`].
//!
//! Payload types are resolved through the [`EventGraph`]: first by the row's
//! alias, then by its recorded type descriptor. A row matching neither fails
//! with [`Error::UnknownEventType`](cadence_core::Error::UnknownEventType).

use cadence_core::{Event, EventGraph, Result, Serializer, StreamIdentity, StreamKey};
use cadence_storage::{AsyncRowReader, Column, EventRow, RowReader};
use std::sync::Arc;

/// Resolves rows into events
pub trait EventSelector: Send + Sync {
    /// Stream identity mode this selector reads
    fn identity(&self) -> StreamIdentity;

    /// Registry used to resolve payload types
    fn graph(&self) -> &EventGraph;

    /// Payload byte encoding
    fn serializer(&self) -> &dyn Serializer;

    /// Read the stream key column
    fn read_stream(&self, row: &dyn EventRow) -> Result<StreamKey>;

    /// Resolve one row
    fn resolve(&self, row: &dyn EventRow) -> Result<Event> {
        let alias = row.get_string(Column::Type)?;
        let descriptor = row.get_opt_string(Column::TypeDescriptor)?;
        let mapping = self.graph().resolve(&alias, descriptor.as_deref())?;
        let data = mapping.decode(self.serializer(), row.get_bytes(Column::Data)?)?;

        Ok(Event {
            id: row.get_uuid(Column::Id)?,
            sequence: row.get_u64(Column::Sequence)?,
            stream: self.read_stream(row)?,
            version: row.get_u64(Column::Version)?,
            type_name: alias,
            data,
            timestamp: row.get_timestamp(Column::Timestamp)?,
            tenant_id: row.get_opt_string(Column::TenantId)?,
        })
    }
}

/// Selector for UUID-keyed streams
#[derive(Debug, Clone)]
pub struct GuidEventSelector {
    graph: Arc<EventGraph>,
    serializer: Arc<dyn Serializer>,
}

impl GuidEventSelector {
    /// Create a selector over `graph`
    pub fn new(graph: Arc<EventGraph>, serializer: Arc<dyn Serializer>) -> Self {
        Self { graph, serializer }
    }
}

impl EventSelector for GuidEventSelector {
    fn identity(&self) -> StreamIdentity {
        StreamIdentity::AsGuid
    }

    fn graph(&self) -> &EventGraph {
        &self.graph
    }

    fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    fn read_stream(&self, row: &dyn EventRow) -> Result<StreamKey> {
        row.get_uuid(Column::StreamId).map(StreamKey::Id)
    }
}

/// Selector for string-keyed streams
#[derive(Debug, Clone)]
pub struct StringEventSelector {
    graph: Arc<EventGraph>,
    serializer: Arc<dyn Serializer>,
}

impl StringEventSelector {
    /// Create a selector over `graph`
    pub fn new(graph: Arc<EventGraph>, serializer: Arc<dyn Serializer>) -> Self {
        Self { graph, serializer }
    }
}

impl EventSelector for StringEventSelector {
    fn identity(&self) -> StreamIdentity {
        StreamIdentity::AsString
    }

    fn graph(&self) -> &EventGraph {
        &self.graph
    }

    fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    fn read_stream(&self, row: &dyn EventRow) -> Result<StreamKey> {
        row.get_string(Column::StreamId).map(StreamKey::Key)
    }
}

/// Selector matching a store's stream identity
pub fn selector_for(
    identity: StreamIdentity,
    graph: Arc<EventGraph>,
    serializer: Arc<dyn Serializer>,
) -> Arc<dyn EventSelector> {
    match identity {
        StreamIdentity::AsGuid => Arc::new(GuidEventSelector::new(graph, serializer)),
        StreamIdentity::AsString => Arc::new(StringEventSelector::new(graph, serializer)),
    }
}

/// Resolve every remaining row of a reader, in read order
pub fn resolve_rows(selector: &dyn EventSelector, reader: &mut dyn RowReader) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    while let Some(row) = reader.next_row()? {
        events.push(selector.resolve(&row)?);
    }
    Ok(events)
}

/// Resolve every remaining row of a suspendable reader, in read order
pub async fn resolve_rows_async<R>(selector: &dyn EventSelector, reader: &mut R) -> Result<Vec<Event>>
where
    R: AsyncRowReader + ?Sized,
{
    let mut events = Vec::new();
    while let Some(row) = reader.next_row().await? {
        events.push(selector.resolve(&row)?);
    }
    Ok(events)
}
