//! Convenient imports for cadence.
//!
//! ```ignore
//! use cadence::prelude::*;
//!
//! let store = EventStore::in_memory(StoreOptions::default());
//! ```

// Main entry point
pub use crate::store::{EventStore, EventStoreBuilder, StoreOptions};

// Error handling
pub use cadence_core::{Error, Result};

// Core types
pub use cadence_core::{
    AsyncOptions, DaemonSettings, Event, EventPage, EventStream, StallPolicy, StreamIdentity,
    StreamKey,
};

// Projection daemon
pub use cadence_daemon::{
    CancellationToken, DaemonLifecycle, Fetcher, FetcherState, ProjectionTrack, TrackMessage,
};

// Re-export serde_json for convenience
pub use serde_json::json;
