//! EventPage: the outcome of one fetch attempt
//!
//! A page covers the half-open sequence range `(from, to]` where
//! `to = from + page_size`. It records two different views of that range:
//!
//! - `sequences`: every sequence number observed in the range, regardless of
//!   the subscription's type filter. Used only to detect allocation gaps.
//! - `events`: the resolved events that match the filter, ascending.
//!
//! ## Gaps
//!
//! Sequence numbers are allocated before their transaction commits, so a
//! reader can observe `1..=4` and `6..=10` while `5` is still invisible. Such a
//! page is *not sequential*. The gap is normally transient; the fetcher
//! re-reads the range until it closes (see [`EventPage::can_continue_processing`]).
//!
//! Detection is anchored at `from`: the checkpoint is confirmed, so `from + 1`
//! is the next number that must become visible. It extends up to the highest
//! settled sequence known, whether inside the range or beyond `to`. A range
//! that is empty while later rows have settled is therefore one large gap.

use crate::event::{Event, EventStream};
use crate::types::StreamIdentity;

/// Result of one fetch attempt over `(from, to]`
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    from: u64,
    to: u64,
    page_size: usize,
    sequences: Vec<u64>,
    events: Vec<Event>,
    next_known_sequence: u64,
    last_known_sequence: u64,
    stream_identity: StreamIdentity,
    skipped: Vec<u64>,
}

impl EventPage {
    /// Create a page for the range `(from, from + page_size]`
    ///
    /// `sequences` is sorted and de-duplicated; `events` is sorted by sequence.
    pub fn new(from: u64, page_size: usize, mut sequences: Vec<u64>, mut events: Vec<Event>) -> Self {
        sequences.sort_unstable();
        sequences.dedup();
        events.sort_by_key(|e| e.sequence);

        Self {
            from,
            to: from + page_size as u64,
            page_size,
            sequences,
            events,
            next_known_sequence: 0,
            last_known_sequence: 0,
            stream_identity: StreamIdentity::default(),
            skipped: Vec::new(),
        }
    }

    /// Set the advisory cursors (0 means none)
    pub fn with_known_sequences(mut self, next_known: u64, last_known: u64) -> Self {
        self.next_known_sequence = next_known;
        self.last_known_sequence = last_known;
        self
    }

    /// Record the stream identity mode the events were resolved under
    pub fn with_stream_identity(mut self, identity: StreamIdentity) -> Self {
        self.stream_identity = identity;
        self
    }

    /// Accept the page's current gaps as permanently skipped
    pub fn skip_gaps(mut self) -> Self {
        self.skipped = self.missing_sequences();
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Exclusive lower bound
    pub fn from(&self) -> u64 {
        self.from
    }

    /// Attempted inclusive upper bound
    pub fn to(&self) -> u64 {
        self.to
    }

    /// Requested page size
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Every sequence observed in the range, ascending
    pub fn sequences(&self) -> &[u64] {
        &self.sequences
    }

    /// Resolved events matching the type filter, ascending by sequence
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Consume the page, keeping its events
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Number of resolved events
    pub fn count(&self) -> usize {
        self.events.len()
    }

    /// True when nothing at all was observed in the range
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty() && self.events.is_empty()
    }

    /// Smallest matching sequence beyond `to` (0 if none)
    pub fn next_known_sequence(&self) -> u64 {
        self.next_known_sequence
    }

    /// Largest sequence at or beyond `to` (0 if none)
    pub fn last_known_sequence(&self) -> u64 {
        self.last_known_sequence
    }

    /// Stream identity mode of the events
    pub fn stream_identity(&self) -> StreamIdentity {
        self.stream_identity
    }

    /// Gaps that were given up on instead of converging
    pub fn skipped_sequences(&self) -> &[u64] {
        &self.skipped
    }

    /// Events grouped by stream, each stream in version order
    pub fn streams(&self) -> Vec<EventStream> {
        EventStream::group(&self.events)
    }

    // ========================================================================
    // Gap detection
    // ========================================================================

    /// Sequence numbers in the range that must exist but are not visible
    ///
    /// Every number above `from` up to the highest settled sequence known
    /// (capped at `to`) that was not observed.
    pub fn missing_sequences(&self) -> Vec<u64> {
        let horizon = self.horizon().min(self.to);
        let mut observed = self.sequences.iter().peekable();
        let mut missing = Vec::new();
        for n in self.from + 1..=horizon {
            if observed.next_if_eq(&&n).is_none() {
                missing.push(n);
            }
        }
        missing
    }

    /// True when nothing is missing between `from` and the highest known sequence
    pub fn is_sequential(&self) -> bool {
        self.missing_sequences().is_empty()
    }

    /// Gap-convergence predicate
    ///
    /// `previous` is the prior attempt over the same range. Returns true when
    /// no number missing now was also missing then: every earlier gap has
    /// been filled or has fallen outside the bound that attempt observed.
    pub fn can_continue_processing(&self, previous: &EventPage) -> bool {
        let earlier_missing = previous.missing_sequences();
        self.missing_sequences()
            .iter()
            .all(|n| earlier_missing.binary_search(n).is_err())
    }

    /// Highest settled sequence known to this page (0 if none)
    fn horizon(&self) -> u64 {
        let observed = self.sequences.last().copied().unwrap_or(0);
        observed
            .max(self.next_known_sequence)
            .max(self.last_known_sequence)
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// True when the tail of the log has been reached
    ///
    /// Fewer matching events than the page size and no known matching
    /// sequence beyond the bound.
    pub fn should_pause(&self) -> bool {
        self.events.len() < self.page_size && self.next_known_sequence == 0
    }

    /// Highest position confirmed read by this page
    ///
    /// The largest sequence observed or explicitly skipped; `from` when the
    /// page resolved nothing. Never the attempted bound alone.
    pub fn last_encountered(&self) -> u64 {
        let observed = self.sequences.last().copied().unwrap_or(self.from);
        let skipped = self.skipped.last().copied().unwrap_or(self.from);
        observed.max(skipped)
    }

    /// Checkpoint to record when this page ends a one-shot run
    pub fn ending(&self) -> u64 {
        self.last_encountered()
    }
}
