//! SQLite event log
//!
//! One connection behind a mutex; every read or write runs on the blocking
//! pool. The fetch reads of one attempt share a single read transaction, so
//! the four results describe the same snapshot.
//!
//! Stream keys are stored as text in both identity modes. The decoder for the
//! `stream_id` column is picked once when the log is opened, and the mode is
//! recorded in `cd_meta` so a file cannot be reopened under the other mode.

use crate::log::{EventLog, LogSession, ProgressionStore, WindowQuery, WindowResult};
use crate::row::{Column, RowSet, StoredRow};
use async_trait::async_trait;
use cadence_core::{Error, NewEvent, Result, StorageFault, StreamIdentity, StreamKey};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cd_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cd_streams (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    tenant_id TEXT,
    created INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cd_events (
    seq_id INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    stream_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    type TEXT NOT NULL,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    tenant_id TEXT,
    type_descriptor TEXT,
    UNIQUE (stream_id, version)
);

CREATE INDEX IF NOT EXISTS cd_events_type_seq ON cd_events (type, seq_id);

CREATE TABLE IF NOT EXISTS cd_event_progression (
    name TEXT PRIMARY KEY,
    last_seq_id INTEGER NOT NULL,
    last_updated INTEGER NOT NULL
);
";

const SELECT_ROW: &str = "SELECT id, type, version, data, seq_id, stream_id, timestamp, tenant_id, type_descriptor FROM cd_events";

type StreamDecoder = fn(String) -> Result<StreamKey>;

fn decode_guid_stream(raw: String) -> Result<StreamKey> {
    Uuid::parse_str(&raw)
        .map(StreamKey::Id)
        .map_err(|e| Error::column(Column::StreamId.name(), e.to_string()))
}

fn decode_string_stream(raw: String) -> Result<StreamKey> {
    Ok(StreamKey::Key(raw))
}

/// Classify a rusqlite error into the storage fault taxonomy
pub fn sqlite_error(error: rusqlite::Error) -> Error {
    let fault = match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => StorageFault::Busy,
            ErrorCode::CannotOpen => StorageFault::Connection,
            ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt => StorageFault::Schema,
            _ => StorageFault::Query,
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StorageFault::Decode,
        _ => StorageFault::Query,
    };
    Error::storage(fault, error.to_string())
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64, column: Column) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::column(column.name(), format!("negative value {}", value)))
}

fn cutoff_millis(buffer: Duration) -> i64 {
    let buffer_ms = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_sub(buffer_ms)
}

fn timestamp_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::column(Column::Timestamp.name(), format!("out of range: {}", ms)))
}

async fn blocking<T, F>(conn: &Arc<Mutex<Connection>>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock();
        work(&mut guard)
    })
    .await
    .map_err(|e| Error::TaskPanicked(e.to_string()))?
}

/// Event log persisted in SQLite
#[derive(Clone)]
pub struct SqliteLog {
    conn: Arc<Mutex<Connection>>,
    identity: StreamIdentity,
    decode_stream: StreamDecoder,
}

impl std::fmt::Debug for SqliteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLog")
            .field("identity", &self.identity)
            .finish()
    }
}

impl SqliteLog {
    /// Open (or create) a log file
    pub fn open(path: impl AsRef<Path>, identity: StreamIdentity) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(sqlite_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(sqlite_error)?;
        debug!(path = %path.display(), journal_mode = %mode, "opened sqlite log");
        Self::init(conn, identity)
    }

    /// Open a private in-memory log
    pub fn open_in_memory(identity: StreamIdentity) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Self::init(conn, identity)
    }

    fn init(conn: Connection, identity: StreamIdentity) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(sqlite_error)?;
        conn.execute_batch(SCHEMA).map_err(sqlite_error)?;

        conn.execute(
            "INSERT OR IGNORE INTO cd_meta (key, value) VALUES ('stream_identity', ?1)",
            params![identity.to_string()],
        )
        .map_err(sqlite_error)?;
        let recorded: String = conn
            .query_row(
                "SELECT value FROM cd_meta WHERE key = 'stream_identity'",
                [],
                |row| row.get(0),
            )
            .map_err(sqlite_error)?;
        if recorded != identity.to_string() {
            return Err(Error::storage(
                StorageFault::Schema,
                format!(
                    "log was created with {} stream identity, opened with {}",
                    recorded, identity
                ),
            ));
        }

        let decode_stream: StreamDecoder = match identity {
            StreamIdentity::AsGuid => decode_guid_stream,
            StreamIdentity::AsString => decode_string_stream,
        };
        info!(identity = %identity, "sqlite log ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            identity,
            decode_stream,
        })
    }
}

fn append_blocking(
    conn: &mut Connection,
    tenant_id: Option<&str>,
    events: Vec<(StreamKey, NewEvent)>,
) -> Result<Vec<u64>> {
    let tx = conn.transaction().map_err(sqlite_error)?;
    let now = Utc::now().timestamp_millis();

    // Stream id with its version as of this transaction, in first-touch order
    let mut versions: Vec<(String, i64)> = Vec::new();
    let mut sequences = Vec::with_capacity(events.len());
    {
        let mut current_version = tx
            .prepare_cached("SELECT version FROM cd_streams WHERE id = ?1")
            .map_err(sqlite_error)?;
        let mut insert = tx
            .prepare_cached(
                "INSERT INTO cd_events (id, stream_id, version, type, data, timestamp, tenant_id, type_descriptor)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .map_err(sqlite_error)?;

        for (stream, event) in events {
            let stream_id = stream.to_string();
            let slot = match versions.iter().position(|(id, _)| *id == stream_id) {
                Some(slot) => slot,
                None => {
                    let current: i64 = current_version
                        .query_row(params![stream_id], |row| row.get(0))
                        .optional()
                        .map_err(sqlite_error)?
                        .unwrap_or(0);
                    versions.push((stream_id.clone(), current));
                    versions.len() - 1
                }
            };
            versions[slot].1 += 1;

            let seq = insert
                .insert(params![
                    event.id.to_string(),
                    stream_id,
                    versions[slot].1,
                    event.type_name,
                    event.data,
                    now,
                    tenant_id,
                    event.type_descriptor,
                ])
                .map_err(sqlite_error)?;
            sequences.push(from_sql_int(seq, Column::Sequence)?);
        }
    }

    for (stream_id, version) in &versions {
        tx.execute(
            "INSERT INTO cd_streams (id, version, tenant_id, created) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET version = excluded.version",
            params![stream_id, version, tenant_id, now],
        )
        .map_err(sqlite_error)?;
    }

    tx.commit().map_err(sqlite_error)?;
    Ok(sequences)
}

#[async_trait]
impl EventLog for SqliteLog {
    fn stream_identity(&self) -> StreamIdentity {
        self.identity
    }

    async fn open_session(&self) -> Result<Box<dyn LogSession>> {
        Ok(Box::new(SqliteSession {
            conn: Arc::clone(&self.conn),
            decode_stream: self.decode_stream,
        }))
    }

    async fn append(
        &self,
        stream: &StreamKey,
        tenant_id: Option<&str>,
        events: Vec<NewEvent>,
    ) -> Result<Vec<u64>> {
        let batch = events.into_iter().map(|e| (stream.clone(), e)).collect();
        self.append_batch(tenant_id, batch).await
    }

    async fn append_batch(
        &self,
        tenant_id: Option<&str>,
        events: Vec<(StreamKey, NewEvent)>,
    ) -> Result<Vec<u64>> {
        if let Some((stream, _)) = events.iter().find(|(s, _)| s.identity() != self.identity) {
            return Err(Error::storage(
                StorageFault::Query,
                format!(
                    "stream {} does not match the log's {} stream identity",
                    stream, self.identity
                ),
            ));
        }
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let tenant_id = tenant_id.map(str::to_string);
        blocking(&self.conn, move |conn| {
            append_blocking(conn, tenant_id.as_deref(), events)
        })
        .await
    }
}

#[async_trait]
impl ProgressionStore for SqliteLog {
    async fn load_progress(&self, name: &str) -> Result<Option<u64>> {
        let name = name.to_string();
        blocking(&self.conn, move |conn| {
            let value: Option<i64> = conn
                .query_row(
                    "SELECT last_seq_id FROM cd_event_progression WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sqlite_error)?;
            value.map(|v| from_sql_int(v, Column::Sequence)).transpose()
        })
        .await
    }

    async fn mark_progress(&self, name: &str, sequence: u64) -> Result<()> {
        let name = name.to_string();
        blocking(&self.conn, move |conn| {
            conn.execute(
                "INSERT INTO cd_event_progression (name, last_seq_id, last_updated) VALUES (?1, ?2, ?3)
                 ON CONFLICT (name) DO UPDATE SET last_seq_id = excluded.last_seq_id, last_updated = excluded.last_updated",
                params![name, to_sql_int(sequence), Utc::now().timestamp_millis()],
            )
            .map_err(sqlite_error)?;
            Ok(())
        })
        .await
    }
}

struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
    decode_stream: StreamDecoder,
}

// ============================================================================
// Window reads
// ============================================================================

fn read_sequences(conn: &Connection, query: &WindowQuery) -> Result<Vec<u64>> {
    if query.is_degenerate() {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare_cached(
            "SELECT seq_id FROM cd_events
             WHERE seq_id > ?1 AND seq_id <= ?2 AND timestamp <= ?3
             ORDER BY seq_id",
        )
        .map_err(sqlite_error)?;
    let rows = stmt
        .query_map(
            params![
                to_sql_int(query.after),
                to_sql_int(query.limit),
                cutoff_millis(query.buffer)
            ],
            |row| row.get::<_, i64>(0),
        )
        .map_err(sqlite_error)?;

    let mut sequences = Vec::new();
    for seq in rows {
        sequences.push(from_sql_int(seq.map_err(sqlite_error)?, Column::Sequence)?);
    }
    Ok(sequences)
}

fn type_placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(row: &Row<'_>, decode_stream: StreamDecoder) -> Result<StoredRow> {
    let get = |column: Column| -> Result<Value> { row.get(column.ordinal()).map_err(sqlite_error) };

    let text = |column: Column| -> Result<String> {
        match get(column)? {
            Value::Text(s) => Ok(s),
            other => Err(Error::column(column.name(), format!("expected text, found {:?}", other.data_type()))),
        }
    };
    let opt_text = |column: Column| -> Result<Option<String>> {
        match get(column)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            other => Err(Error::column(column.name(), format!("expected text, found {:?}", other.data_type()))),
        }
    };
    let integer = |column: Column| -> Result<i64> {
        match get(column)? {
            Value::Integer(v) => Ok(v),
            other => Err(Error::column(column.name(), format!("expected integer, found {:?}", other.data_type()))),
        }
    };

    let data = match get(Column::Data)? {
        Value::Blob(bytes) => bytes,
        Value::Text(s) => s.into_bytes(),
        other => {
            return Err(Error::column(
                Column::Data.name(),
                format!("expected blob, found {:?}", other.data_type()),
            ))
        }
    };

    Ok(StoredRow {
        id: Uuid::parse_str(&text(Column::Id)?)
            .map_err(|e| Error::column(Column::Id.name(), e.to_string()))?,
        type_name: text(Column::Type)?,
        version: from_sql_int(integer(Column::Version)?, Column::Version)?,
        data,
        sequence: from_sql_int(integer(Column::Sequence)?, Column::Sequence)?,
        stream: decode_stream(text(Column::StreamId)?)?,
        timestamp: timestamp_from_millis(integer(Column::Timestamp)?)?,
        tenant_id: opt_text(Column::TenantId)?,
        type_descriptor: opt_text(Column::TypeDescriptor)?,
    })
}

fn read_rows(conn: &Connection, query: &WindowQuery, decode_stream: StreamDecoder) -> Result<RowSet> {
    if query.is_degenerate() || query.type_names.is_empty() {
        return Ok(RowSet::default());
    }
    let sql = format!(
        "{} WHERE seq_id > ?1 AND seq_id <= ?2 AND timestamp <= ?3 AND type IN ({}) ORDER BY seq_id",
        SELECT_ROW,
        type_placeholders(4, query.type_names.len())
    );

    let mut values = vec![
        Value::Integer(to_sql_int(query.after)),
        Value::Integer(to_sql_int(query.limit)),
        Value::Integer(cutoff_millis(query.buffer)),
    ];
    values.extend(query.type_names.iter().cloned().map(Value::Text));

    let mut stmt = conn.prepare(&sql).map_err(sqlite_error)?;
    let mut rows = stmt.query(params_from_iter(values.iter())).map_err(sqlite_error)?;
    let mut stored = Vec::new();
    while let Some(row) = rows.next().map_err(sqlite_error)? {
        stored.push(read_row(row, decode_stream)?);
    }
    Ok(RowSet::new(stored))
}

fn read_next_known(conn: &Connection, query: &WindowQuery) -> Result<Option<u64>> {
    if query.type_names.is_empty() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT MIN(seq_id) FROM cd_events WHERE seq_id > ?1 AND timestamp <= ?2 AND type IN ({})",
        type_placeholders(3, query.type_names.len())
    );
    let mut values = vec![
        Value::Integer(to_sql_int(query.limit)),
        Value::Integer(cutoff_millis(query.buffer)),
    ];
    values.extend(query.type_names.iter().cloned().map(Value::Text));

    let value: Option<i64> = conn
        .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
        .map_err(sqlite_error)?;
    value.map(|v| from_sql_int(v, Column::Sequence)).transpose()
}

fn read_last_known(conn: &Connection, query: &WindowQuery) -> Result<Option<u64>> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT MAX(seq_id) FROM cd_events WHERE seq_id >= ?1 AND timestamp <= ?2",
            params![to_sql_int(query.limit), cutoff_millis(query.buffer)],
            |row| row.get(0),
        )
        .map_err(sqlite_error)?;
    value.map(|v| from_sql_int(v, Column::Sequence)).transpose()
}

#[async_trait]
impl LogSession for SqliteSession {
    async fn sequences_in(&mut self, query: &WindowQuery) -> Result<Vec<u64>> {
        let query = query.clone();
        blocking(&self.conn, move |conn| read_sequences(conn, &query)).await
    }

    async fn rows_in(&mut self, query: &WindowQuery) -> Result<RowSet> {
        let query = query.clone();
        let decode_stream = self.decode_stream;
        blocking(&self.conn, move |conn| read_rows(conn, &query, decode_stream)).await
    }

    async fn next_known(&mut self, query: &WindowQuery) -> Result<Option<u64>> {
        let query = query.clone();
        blocking(&self.conn, move |conn| read_next_known(conn, &query)).await
    }

    async fn last_known(&mut self, query: &WindowQuery) -> Result<Option<u64>> {
        let query = query.clone();
        blocking(&self.conn, move |conn| read_last_known(conn, &query)).await
    }

    async fn fetch_window(&mut self, query: &WindowQuery) -> Result<WindowResult> {
        let query = query.clone();
        let decode_stream = self.decode_stream;
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(sqlite_error)?;
            let result = WindowResult {
                sequences: read_sequences(&tx, &query)?,
                rows: read_rows(&tx, &query, decode_stream)?,
                next_known: read_next_known(&tx, &query)?,
                last_known: read_last_known(&tx, &query)?,
            };
            tx.commit().map_err(sqlite_error)?;
            Ok(result)
        })
        .await
    }
}
