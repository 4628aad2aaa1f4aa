//! # Cadence
//!
//! Append-only event log with gap-free asynchronous projection fetching.
//!
//! Writers append events to a globally sequenced log. Projections read that
//! log in ascending pages through a [`Fetcher`], which holds back rows younger
//! than the leading-edge buffer and waits for sequence gaps left by in-flight
//! transactions to close before handing a page over.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cadence::prelude::*;
//!
//! let store = EventStore::in_memory(StoreOptions::default());
//! store.register::<TripStarted>()?;
//! store.append(&StreamKey::new_id(), &[TripStarted { day: 1 }]).await?;
//!
//! let fetcher = store
//!     .fetcher("trips", ["trip_started"], AsyncOptions::default())
//!     .build()?;
//! let (track, mut pages) = store.track("trips").await?;
//! fetcher.start(track, DaemonLifecycle::Continuous, CancellationToken::new())?;
//!
//! while let Some(TrackMessage::Page(page)) = pages.recv().await {
//!     for event in page.events() {
//!         // project the event
//!     }
//!     pages.commit(page.ending()).await?;
//! }
//! ```
//!
//! ## Crates
//!
//! - `cadence-core` - events, pages, type registry, serializers, settings, errors
//! - `cadence-storage` - the log contract with in-memory and SQLite backends
//! - `cadence-daemon` - fetchers, retry isolation, row resolution, tracks

#![warn(missing_docs)]

mod store;

pub mod prelude;

pub use store::{EventStore, EventStoreBuilder, StoreOptions};

pub use cadence_daemon as daemon;
pub use cadence_storage as storage;

pub use cadence_core::{
    AsyncOptions, DaemonSettings, Error, Event, EventGraph, EventPage, EventStream, NewEvent,
    Result, RetryConfig, SerializerKind, StallPolicy, StorageFault, StreamIdentity, StreamKey,
};
pub use cadence_daemon::{
    CancellationToken, DaemonLifecycle, FetchHandle, Fetcher, FetcherBuilder, FetcherState,
    ProjectionTrack, QueuedTrack, TrackMessage, TrackReceiver,
};
pub use cadence_storage::{EventLog, MemoryLog, SqliteLog};
