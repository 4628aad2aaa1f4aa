//! Asynchronous projection daemon for cadence
//!
//! The daemon turns the raw, globally sequenced event log into gap-free,
//! ordered pages for projection consumers:
//! - [`Fetcher`]: polling loop, leading-edge buffer, gap convergence, lifecycle
//! - [`ErrorHandler`]: retry of transient store faults under a [`RetryPolicy`]
//! - [`EventSelector`]: row-to-event resolution for UUID or string stream keys
//! - [`ProjectionTrack`]: the consumer contract, with the channel-backed [`QueuedTrack`]
//! - [`DaemonLogger`]: lifecycle notifications
//!
//! # Example
//!
//! ```no_run
//! use cadence_core::{AsyncOptions, EventGraph, JsonSerializer, StreamIdentity};
//! use cadence_daemon::{selector_for, CancellationToken, DaemonLifecycle, Fetcher, QueuedTrack};
//! use cadence_storage::MemoryLog;
//! use std::sync::Arc;
//!
//! # async fn run() -> cadence_core::Result<()> {
//! let log = Arc::new(MemoryLog::new(StreamIdentity::AsGuid));
//! let graph = Arc::new(EventGraph::new());
//! let selector = selector_for(StreamIdentity::AsGuid, graph, Arc::new(JsonSerializer));
//!
//! let fetcher = Fetcher::builder("trip_summary", log, selector)
//!     .with_options(AsyncOptions::new().with_page_size(500))
//!     .with_event_types(["trip_started", "trip_ended"])
//!     .build()?;
//!
//! let (track, mut pages) = QueuedTrack::new("trip_summary", 0);
//! fetcher.start(track, DaemonLifecycle::Continuous, CancellationToken::new())?;
//! while let Some(message) = pages.recv().await {
//!     // apply the page, then pages.commit(..)
//! #   let _ = message;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error_handler;
pub mod fetcher;
pub mod logger;
pub mod selector;
pub mod track;

pub use cancel::CancellationToken;
pub use error_handler::{ErrorHandler, ExponentialBackoff, NoRetry, RetryPolicy};
pub use fetcher::{DaemonLifecycle, FetchHandle, Fetcher, FetcherBuilder, FetcherState};
pub use logger::{
    DaemonLogger, Notification, NulloDaemonLogger, RecordingDaemonLogger, TracingDaemonLogger,
};
pub use selector::{
    resolve_rows, resolve_rows_async, selector_for, EventSelector, GuidEventSelector,
    StringEventSelector,
};
pub use track::{ProjectionTrack, QueuedTrack, TrackMessage, TrackReceiver};
