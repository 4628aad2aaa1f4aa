//! Fetcher Comprehensive Test Suite
//!
//! Drives fetchers end to end through the [`EventStore`] facade, against both
//! log backends.
//!
//! ## Key Verification Points
//!
//! 1. Pages are disjoint, ascending and never skip a committed sequence
//! 2. Gaps left by in-flight appends are waited out before a page is returned
//! 3. Stalled gaps follow the configured stall policy
//! 4. Transient faults are retried; everything else ends the polling loop
//! 5. Lifecycle transitions for continuous runs, one-shot runs and cancellation
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all fetcher tests
//! cargo test --test fetcher_comprehensive
//!
//! # Run the gap convergence tests only
//! cargo test --test fetcher_comprehensive convergence::
//! ```

use std::sync::Arc;
use std::time::Duration;

use cadence::daemon::RecordingDaemonLogger;
use cadence::prelude::*;
use cadence::{Fetcher, NewEvent, SerializerKind, TrackReceiver};
use serde::{Deserialize, Serialize};

pub mod convergence;
pub mod errors;
pub mod lifecycle;
pub mod paging;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// A trip began
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripStarted {
    pub day: u32,
}

/// A trip ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripEnded {
    pub day: u32,
}

/// A vehicle broke down mid-trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub reason: String,
}

/// Settings with no leading-edge buffer and short delays
pub fn quick_settings() -> DaemonSettings {
    DaemonSettings::default()
        .with_leading_edge_buffer(Duration::ZERO)
        .with_fetching_cooldown(Duration::from_millis(50))
}

/// Route daemon logging to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

/// In-memory store with every trip event type registered
pub fn trip_store(settings: DaemonSettings) -> EventStore {
    init_tracing();
    let store = EventStore::builder()
        .daemon(settings)
        .open()
        .expect("Failed to create in-memory store");
    register_trip_types(&store);
    store
}

/// Register the trip event types
pub fn register_trip_types(store: &EventStore) {
    store.register::<TripStarted>().unwrap();
    store.register::<TripEnded>().unwrap();
    store.register::<Breakdown>().unwrap();
}

/// Build a fetcher reporting to a recording logger
pub fn recording_fetcher(
    store: &EventStore,
    event_types: &[&str],
    page_size: usize,
) -> (Fetcher, Arc<RecordingDaemonLogger>) {
    let logger = Arc::new(RecordingDaemonLogger::new());
    let fetcher = store
        .fetcher(
            "trip_summary",
            event_types.iter().copied(),
            AsyncOptions::new().with_page_size(page_size),
        )
        .with_logger(logger.clone())
        .build()
        .expect("Failed to build fetcher");
    (fetcher, logger)
}

/// Append `count` trip starts to one stream
pub async fn append_trips(store: &EventStore, stream: &StreamKey, count: u32) -> Vec<u64> {
    let trips: Vec<_> = (0..count).map(|day| TripStarted { day }).collect();
    store.append(stream, &trips).await.unwrap()
}

/// Encoded trip start
pub fn trip_started(store: &EventStore, day: u32) -> NewEvent {
    store.encode(&TripStarted { day }).unwrap()
}

/// Encoded trip end
pub fn trip_ended(store: &EventStore, day: u32) -> NewEvent {
    store.encode(&TripEnded { day }).unwrap()
}

/// Fetch pages from `from` until the tail is reached
pub async fn fetch_to_tail(fetcher: &Fetcher, from: u64) -> Vec<EventPage> {
    let mut pages = Vec::new();
    let mut last = from;
    loop {
        let page = fetcher.fetch_next_page(last).await.unwrap();
        let caught_up = page.should_pause();
        last = page.last_encountered();
        pages.push(page);
        if caught_up {
            return pages;
        }
    }
}

/// Receive pages until a one-shot run reports its checkpoint
pub async fn drain_until_finished(receiver: &mut TrackReceiver) -> (Vec<EventPage>, u64) {
    let mut pages = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
            .await
            .expect("Timed out waiting for the track");
        match message {
            Some(TrackMessage::Page(page)) => pages.push(page),
            Some(TrackMessage::Finished(checkpoint)) => return (pages, checkpoint),
            None => panic!("Track closed before the run finished"),
        }
    }
}

/// Next page delivered to a track
pub async fn next_page(receiver: &mut TrackReceiver) -> EventPage {
    let message = tokio::time::timeout(Duration::from_secs(10), receiver.recv())
        .await
        .expect("Timed out waiting for a page");
    match message {
        Some(TrackMessage::Page(page)) => page,
        other => panic!("Expected a page, got {:?}", other),
    }
}

/// Wait until the fetcher's polling loop has exited
pub async fn wait_until_idle(fetcher: &Fetcher) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while fetcher.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Polling loop did not exit");
}

/// Sequences of the events in `pages`, in delivery order
pub fn delivered_sequences(pages: &[EventPage]) -> Vec<u64> {
    pages
        .iter()
        .flat_map(|page| page.events().iter().map(|e| e.sequence))
        .collect()
}
