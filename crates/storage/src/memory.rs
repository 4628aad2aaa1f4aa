//! In-process event log
//!
//! `MemoryLog` keeps the events table in a `BTreeMap` keyed by sequence and
//! allocates sequences from an `AtomicU64`, independently of commit. A
//! [`PendingAppend`] holds sequences that are allocated but not yet visible,
//! which reproduces the allocation-versus-visibility skew of a relational
//! sequence generator:
//!
//! ```text
//! reserve(a) -> seq 5      reserve(b) -> seq 6
//!                          commit(b)          readers see 6, not 5
//! commit(a)                                   readers see 5 and 6
//! ```
//!
//! Abandoned reservations leave a permanent hole, as a rolled-back
//! transaction does after drawing from a sequence.
//!
//! A stream holds at most one pending reservation. A second `reserve` on it
//! fails with [`Error::ConcurrencyConflict`] until the first commits or is
//! abandoned, so releasing versions never leaves a hole in a stream.

use crate::log::{is_settled, EventLog, LogSession, ProgressionStore, WindowQuery};
use crate::row::{RowSet, StoredRow};
use async_trait::async_trait;
use cadence_core::{Error, NewEvent, Result, StorageFault, StreamIdentity, StreamKey};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    events: BTreeMap<u64, StoredRow>,
    /// Highest version handed out per stream, reserved or committed
    streams: HashMap<StreamKey, u64>,
    /// Streams with an uncommitted reservation
    pending: HashSet<StreamKey>,
    progression: HashMap<String, u64>,
}

#[derive(Debug)]
struct Shared {
    identity: StreamIdentity,
    tables: RwLock<Tables>,
    /// Last allocated sequence; the first allocation returns 1
    sequence: AtomicU64,
    faults: Mutex<VecDeque<StorageFault>>,
    window_queries: AtomicU64,
    open_sessions: AtomicUsize,
}

/// In-memory event log
#[derive(Debug, Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    /// Create an empty log keyed by `identity`
    pub fn new(identity: StreamIdentity) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                tables: RwLock::new(Tables::default()),
                sequence: AtomicU64::new(0),
                faults: Mutex::new(VecDeque::new()),
                window_queries: AtomicU64::new(0),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Allocate sequences and versions without making the events visible
    pub fn reserve(
        &self,
        stream: &StreamKey,
        tenant_id: Option<&str>,
        events: Vec<NewEvent>,
    ) -> Result<PendingAppend> {
        let batch = events.into_iter().map(|e| (stream.clone(), e)).collect();
        self.reserve_batch(tenant_id, batch)
    }

    /// Allocate one block of sequences across several streams
    ///
    /// Events keep their input order, so streams may interleave. Each stream's
    /// versions continue contiguously from its current version.
    pub fn reserve_batch(
        &self,
        tenant_id: Option<&str>,
        events: Vec<(StreamKey, NewEvent)>,
    ) -> Result<PendingAppend> {
        if let Some((stream, _)) = events
            .iter()
            .find(|(stream, _)| stream.identity() != self.shared.identity)
        {
            return Err(Error::storage(
                StorageFault::Query,
                format!(
                    "stream {} does not match the log's {} stream identity",
                    stream, self.shared.identity
                ),
            ));
        }

        let mut tables = self.shared.tables.write();
        if let Some((stream, _)) = events
            .iter()
            .find(|(stream, _)| tables.pending.contains(stream))
        {
            return Err(Error::ConcurrencyConflict {
                stream: stream.to_string(),
            });
        }

        let mut bases: Vec<(StreamKey, u64)> = Vec::new();
        let mut versions: Vec<u64> = Vec::with_capacity(events.len());
        for (stream, _) in &events {
            let current = tables.streams.get(stream).copied().unwrap_or(0);
            if !bases.iter().any(|(s, _)| s == stream) {
                bases.push((stream.clone(), current));
                tables.pending.insert(stream.clone());
            }
            tables.streams.insert(stream.clone(), current + 1);
            versions.push(current + 1);
        }

        let count = events.len() as u64;
        let first_sequence = self.shared.sequence.fetch_add(count, Ordering::SeqCst) + 1;
        drop(tables);

        let rows = events
            .into_iter()
            .zip(versions)
            .enumerate()
            .map(|(i, ((stream, event), version))| StoredRow {
                id: event.id,
                type_name: event.type_name,
                version,
                data: event.data,
                sequence: first_sequence + i as u64,
                stream,
                timestamp: Utc::now(),
                tenant_id: tenant_id.map(str::to_string),
                type_descriptor: Some(event.type_descriptor),
            })
            .collect();

        Ok(PendingAppend {
            shared: Arc::clone(&self.shared),
            bases,
            rows,
            finished: false,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Fail the next `count` fetch attempts with `fault`
    pub fn inject_faults(&self, fault: StorageFault, count: usize) {
        let mut faults = self.shared.faults.lock();
        faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Number of fetch attempts served, including failed ones
    pub fn window_queries(&self) -> u64 {
        self.shared.window_queries.load(Ordering::SeqCst)
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    /// Last allocated sequence (committed or not)
    pub fn highest_sequence(&self) -> u64 {
        self.shared.sequence.load(Ordering::SeqCst)
    }

    /// Number of visible events
    pub fn len(&self) -> usize {
        self.shared.tables.read().events.len()
    }

    /// True when no event is visible
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Events with allocated sequences that are not yet visible
///
/// Dropping a pending append without committing abandons it.
#[derive(Debug)]
pub struct PendingAppend {
    shared: Arc<Shared>,
    /// Each touched stream with its version before the reservation
    bases: Vec<(StreamKey, u64)>,
    rows: Vec<StoredRow>,
    finished: bool,
}

impl PendingAppend {
    /// Sequences allocated to these events, in input order
    pub fn sequences(&self) -> Vec<u64> {
        self.rows.iter().map(|r| r.sequence).collect()
    }

    /// Make the events visible, committed now
    pub fn commit(self) -> Vec<u64> {
        self.commit_at(Utc::now())
    }

    /// Make the events visible with an explicit commit time
    pub fn commit_at(mut self, timestamp: DateTime<Utc>) -> Vec<u64> {
        self.finished = true;
        let rows = std::mem::take(&mut self.rows);
        let sequences: Vec<u64> = rows.iter().map(|r| r.sequence).collect();

        let mut tables = self.shared.tables.write();
        for mut row in rows {
            row.timestamp = timestamp;
            tables.events.insert(row.sequence, row);
        }
        for (stream, _) in &self.bases {
            tables.pending.remove(stream);
        }
        debug!(streams = self.bases.len(), count = sequences.len(), "committed append");
        sequences
    }

    /// Give up the reservation; its sequences are never reused
    pub fn abandon(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut tables = self.shared.tables.write();
        for (stream, base) in &self.bases {
            tables.pending.remove(stream);
            tables.streams.insert(stream.clone(), *base);
        }
        if !self.rows.is_empty() {
            debug!(sequences = ?self.sequences(), "abandoned append");
        }
    }
}

impl Drop for PendingAppend {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    fn stream_identity(&self) -> StreamIdentity {
        self.shared.identity
    }

    async fn open_session(&self) -> Result<Box<dyn LogSession>> {
        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn append(
        &self,
        stream: &StreamKey,
        tenant_id: Option<&str>,
        events: Vec<NewEvent>,
    ) -> Result<Vec<u64>> {
        Ok(self.reserve(stream, tenant_id, events)?.commit())
    }

    async fn append_batch(
        &self,
        tenant_id: Option<&str>,
        events: Vec<(StreamKey, NewEvent)>,
    ) -> Result<Vec<u64>> {
        Ok(self.reserve_batch(tenant_id, events)?.commit())
    }
}

#[async_trait]
impl ProgressionStore for MemoryLog {
    async fn load_progress(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.shared.tables.read().progression.get(name).copied())
    }

    async fn mark_progress(&self, name: &str, sequence: u64) -> Result<()> {
        self.shared
            .tables
            .write()
            .progression
            .insert(name.to_string(), sequence);
        Ok(())
    }
}

struct MemorySession {
    shared: Arc<Shared>,
}

impl MemorySession {
    fn settled<'a>(
        tables: &'a Tables,
        query: &WindowQuery,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a StoredRow> + 'a {
        let buffer = query.buffer;
        let window = if query.is_degenerate() {
            tables.events.range(1..1)
        } else {
            tables.events.range(query.after + 1..=query.limit)
        };
        window
            .map(|(_, row)| row)
            .filter(move |row| is_settled(row.timestamp, now, buffer))
    }
}

#[async_trait]
impl LogSession for MemorySession {
    async fn sequences_in(&mut self, query: &WindowQuery) -> Result<Vec<u64>> {
        self.shared.window_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.shared.faults.lock().pop_front() {
            return Err(Error::storage(fault, "injected fault"));
        }

        let tables = self.shared.tables.read();
        Ok(Self::settled(&tables, query, Utc::now())
            .map(|row| row.sequence)
            .collect())
    }

    async fn rows_in(&mut self, query: &WindowQuery) -> Result<RowSet> {
        let tables = self.shared.tables.read();
        let rows = Self::settled(&tables, query, Utc::now())
            .filter(|row| query.matches_type(&row.type_name))
            .cloned()
            .collect();
        Ok(RowSet::new(rows))
    }

    async fn next_known(&mut self, query: &WindowQuery) -> Result<Option<u64>> {
        let tables = self.shared.tables.read();
        let now = Utc::now();
        Ok(tables
            .events
            .range(query.limit.saturating_add(1)..)
            .map(|(_, row)| row)
            .find(|row| {
                query.matches_type(&row.type_name) && is_settled(row.timestamp, now, query.buffer)
            })
            .map(|row| row.sequence))
    }

    async fn last_known(&mut self, query: &WindowQuery) -> Result<Option<u64>> {
        let tables = self.shared.tables.read();
        let now = Utc::now();
        Ok(tables
            .events
            .range(query.limit..)
            .rev()
            .map(|(_, row)| row)
            .find(|row| is_settled(row.timestamp, now, query.buffer))
            .map(|row| row.sequence))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}
