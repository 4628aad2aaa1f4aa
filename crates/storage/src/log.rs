//! The fetch query contract
//!
//! Every fetch attempt issues four related reads over the window
//! `(after, limit]`, all restricted to rows whose commit age is at least the
//! leading-edge buffer:
//!
//! 1. every sequence number in the window, whatever its type
//! 2. full rows in the window whose type is subscribed
//! 3. the smallest subscribed sequence beyond `limit` (next known)
//! 4. the largest sequence at or beyond `limit` (last known)
//!
//! A [`LogSession`] is the scoped connection those reads run on. Sessions are
//! opened per attempt and released when dropped, on every exit path.
//!
//! Commit age is measured against the application clock for every backend.
//! The buffer is a safety margin against visibility races, not a guarantee.

use crate::row::RowSet;
use async_trait::async_trait;
use cadence_core::{NewEvent, Result, StreamIdentity, StreamKey};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Parameters of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery {
    /// Exclusive lower bound
    pub after: u64,
    /// Inclusive upper bound
    pub limit: u64,
    /// Minimum commit age of visible rows
    pub buffer: Duration,
    /// Subscribed type aliases
    pub type_names: Vec<String>,
}

impl WindowQuery {
    /// Query for the window `(after, after + page_size]`
    pub fn new(after: u64, page_size: usize, buffer: Duration, type_names: Vec<String>) -> Self {
        Self {
            after,
            limit: after.saturating_add(page_size as u64),
            buffer,
            type_names,
        }
    }

    /// True when the window contains no sequence number at all
    pub fn is_degenerate(&self) -> bool {
        self.limit <= self.after
    }

    /// True when `type_name` is subscribed
    pub fn matches_type(&self, type_name: &str) -> bool {
        self.type_names.iter().any(|t| t == type_name)
    }
}

/// Raw outcome of the four reads
#[derive(Debug, Clone, Default)]
pub struct WindowResult {
    /// Every settled sequence in the window, ascending
    pub sequences: Vec<u64>,
    /// Settled rows of subscribed types, ascending by sequence
    pub rows: RowSet,
    /// Smallest subscribed sequence beyond the window
    pub next_known: Option<u64>,
    /// Largest sequence at or beyond the window's upper bound
    pub last_known: Option<u64>,
}

/// A scoped connection to the log
#[async_trait]
pub trait LogSession: Send {
    /// Every settled sequence in `(after, limit]`
    async fn sequences_in(&mut self, query: &WindowQuery) -> Result<Vec<u64>>;

    /// Settled rows of subscribed types in `(after, limit]`
    async fn rows_in(&mut self, query: &WindowQuery) -> Result<RowSet>;

    /// Smallest settled, subscribed sequence greater than `limit`
    async fn next_known(&mut self, query: &WindowQuery) -> Result<Option<u64>>;

    /// Largest settled sequence greater than or equal to `limit`
    async fn last_known(&mut self, query: &WindowQuery) -> Result<Option<u64>>;

    /// Run all four reads
    ///
    /// Backends that can read from one snapshot should override this.
    async fn fetch_window(&mut self, query: &WindowQuery) -> Result<WindowResult> {
        let sequences = self.sequences_in(query).await?;
        let rows = self.rows_in(query).await?;
        let next_known = self.next_known(query).await?;
        let last_known = self.last_known(query).await?;
        Ok(WindowResult {
            sequences,
            rows,
            next_known,
            last_known,
        })
    }
}

/// An append-only, globally sequenced event log
#[async_trait]
pub trait EventLog: Send + Sync {
    /// How streams are keyed in this log
    fn stream_identity(&self) -> StreamIdentity;

    /// Open a session for one fetch attempt
    async fn open_session(&self) -> Result<Box<dyn LogSession>>;

    /// Append events to one stream
    ///
    /// Versions continue the stream's history contiguously from 1. Returns the
    /// allocated sequence numbers in input order.
    async fn append(
        &self,
        stream: &StreamKey,
        tenant_id: Option<&str>,
        events: Vec<NewEvent>,
    ) -> Result<Vec<u64>>;

    /// Append events for several streams in one transaction
    ///
    /// Sequences follow input order, so streams may interleave. Every
    /// stream's versions continue contiguously, and all events share one
    /// commit time.
    async fn append_batch(
        &self,
        tenant_id: Option<&str>,
        events: Vec<(StreamKey, NewEvent)>,
    ) -> Result<Vec<u64>>;
}

/// Durable checkpoints, one per projection
#[async_trait]
pub trait ProgressionStore: Send + Sync {
    /// Last recorded checkpoint
    async fn load_progress(&self, name: &str) -> Result<Option<u64>>;

    /// Record a checkpoint
    async fn mark_progress(&self, name: &str, sequence: u64) -> Result<()>;
}

/// True when a row committed at `timestamp` is at least `buffer` old at `now`
///
/// Commit times in the future (clock skew) count as age zero.
pub fn is_settled(timestamp: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
    let age = (now - timestamp).to_std().unwrap_or(Duration::ZERO);
    age >= buffer
}
