//! Row access for the events table
//!
//! The resolver reads rows by column, the way a database reader exposes them.
//! [`EventRow`] is that accessor; [`StoredRow`] is the materialized form both
//! backends produce. [`RowReader`] and [`AsyncRowReader`] are the two ways of
//! consuming a result set: plain iteration, or with a suspension point per row.

use async_trait::async_trait;
use cadence_core::{Error, Result, StreamKey};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

/// Columns of the events table, in select order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Event id (UUID)
    Id,
    /// Type alias
    Type,
    /// Version within the stream
    Version,
    /// Serialized payload
    Data,
    /// Global sequence number
    Sequence,
    /// Stream key (UUID or string, per store)
    StreamId,
    /// Commit time
    Timestamp,
    /// Tenant (nullable)
    TenantId,
    /// Fallback type descriptor (nullable)
    TypeDescriptor,
}

impl Column {
    /// All columns in select order
    pub const ALL: [Column; 9] = [
        Column::Id,
        Column::Type,
        Column::Version,
        Column::Data,
        Column::Sequence,
        Column::StreamId,
        Column::Timestamp,
        Column::TenantId,
        Column::TypeDescriptor,
    ];

    /// Column name in the persisted schema
    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Type => "type",
            Column::Version => "version",
            Column::Data => "data",
            Column::Sequence => "seq_id",
            Column::StreamId => "stream_id",
            Column::Timestamp => "timestamp",
            Column::TenantId => "tenant_id",
            Column::TypeDescriptor => "type_descriptor",
        }
    }

    /// Position in the select list
    pub fn ordinal(self) -> usize {
        self as usize
    }
}

/// Typed column access on one row
pub trait EventRow {
    /// Read a UUID column
    fn get_uuid(&self, column: Column) -> Result<Uuid>;
    /// Read a non-null text column
    fn get_string(&self, column: Column) -> Result<String>;
    /// Read a nullable text column
    fn get_opt_string(&self, column: Column) -> Result<Option<String>>;
    /// Read an integer column
    fn get_u64(&self, column: Column) -> Result<u64>;
    /// Read a blob column
    fn get_bytes(&self, column: Column) -> Result<&[u8]>;
    /// Read a timestamp column
    fn get_timestamp(&self, column: Column) -> Result<DateTime<Utc>>;
}

/// One materialized row of the events table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Event id
    pub id: Uuid,
    /// Type alias
    pub type_name: String,
    /// Version within the stream
    pub version: u64,
    /// Serialized payload
    pub data: Vec<u8>,
    /// Global sequence number
    pub sequence: u64,
    /// Owning stream
    pub stream: StreamKey,
    /// Commit time
    pub timestamp: DateTime<Utc>,
    /// Tenant
    pub tenant_id: Option<String>,
    /// Fallback type descriptor
    pub type_descriptor: Option<String>,
}

fn wrong_kind(column: Column, wanted: &str) -> Error {
    Error::column(column.name(), format!("not readable as {}", wanted))
}

impl EventRow for StoredRow {
    fn get_uuid(&self, column: Column) -> Result<Uuid> {
        match column {
            Column::Id => Ok(self.id),
            Column::StreamId => self.stream.as_uuid().ok_or_else(|| {
                Error::column(column.name(), "stream is keyed by string, not uuid")
            }),
            _ => Err(wrong_kind(column, "uuid")),
        }
    }

    fn get_string(&self, column: Column) -> Result<String> {
        match column {
            Column::Type => Ok(self.type_name.clone()),
            Column::StreamId => self.stream.as_str().map(str::to_string).ok_or_else(|| {
                Error::column(column.name(), "stream is keyed by uuid, not string")
            }),
            Column::TenantId | Column::TypeDescriptor => self
                .get_opt_string(column)?
                .ok_or_else(|| Error::column(column.name(), "unexpected null")),
            _ => Err(wrong_kind(column, "text")),
        }
    }

    fn get_opt_string(&self, column: Column) -> Result<Option<String>> {
        match column {
            Column::TenantId => Ok(self.tenant_id.clone()),
            Column::TypeDescriptor => Ok(self.type_descriptor.clone()),
            _ => self.get_string(column).map(Some),
        }
    }

    fn get_u64(&self, column: Column) -> Result<u64> {
        match column {
            Column::Version => Ok(self.version),
            Column::Sequence => Ok(self.sequence),
            _ => Err(wrong_kind(column, "integer")),
        }
    }

    fn get_bytes(&self, column: Column) -> Result<&[u8]> {
        match column {
            Column::Data => Ok(&self.data),
            _ => Err(wrong_kind(column, "blob")),
        }
    }

    fn get_timestamp(&self, column: Column) -> Result<DateTime<Utc>> {
        match column {
            Column::Timestamp => Ok(self.timestamp),
            _ => Err(wrong_kind(column, "timestamp")),
        }
    }
}

/// Synchronous row consumption
pub trait RowReader {
    /// Next row, or `None` once the result set is exhausted
    fn next_row(&mut self) -> Result<Option<StoredRow>>;
}

/// Suspendable row consumption
#[async_trait]
pub trait AsyncRowReader: Send {
    /// Next row, or `None` once the result set is exhausted
    async fn next_row(&mut self) -> Result<Option<StoredRow>>;
}

/// A fully fetched result set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    rows: VecDeque<StoredRow>,
}

impl RowSet {
    /// Wrap rows in read order
    pub fn new(rows: Vec<StoredRow>) -> Self {
        Self { rows: rows.into() }
    }

    /// Rows not yet consumed
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when every row has been consumed
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowReader for RowSet {
    fn next_row(&mut self) -> Result<Option<StoredRow>> {
        Ok(self.rows.pop_front())
    }
}

#[async_trait]
impl AsyncRowReader for RowSet {
    async fn next_row(&mut self) -> Result<Option<StoredRow>> {
        Ok(self.rows.pop_front())
    }
}
