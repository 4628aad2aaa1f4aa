//! Main entry point for cadence.
//!
//! [`EventStore`] wires the pieces that must agree with each other once, at
//! configuration time: the stream identity mode, the payload serializer, the
//! type registry, the log backend and the matching row resolver.

use cadence_core::{
    AsyncOptions, DaemonSettings, EventGraph, NewEvent, Result, Serializer, SerializerKind,
    StreamIdentity, StreamKey,
};
use cadence_daemon::{selector_for, EventSelector, FetcherBuilder, QueuedTrack, TrackReceiver};
use cadence_storage::{EventLog, MemoryLog, ProgressionStore, SqliteLog};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Store-wide configuration
///
/// ```toml
/// stream_identity = "as_string"
/// serializer = "message_pack"
///
/// [daemon]
/// leading_edge_buffer_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreOptions {
    /// How streams are keyed
    #[serde(default)]
    pub stream_identity: StreamIdentity,

    /// Payload encoding
    #[serde(default)]
    pub serializer: SerializerKind,

    /// Settings handed to every fetcher created by the store
    #[serde(default)]
    pub daemon: DaemonSettings,
}

impl StoreOptions {
    /// Parse options from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let options: Self = toml::from_str(source)?;
        options.daemon.validate()?;
        Ok(options)
    }
}

/// An event store.
///
/// Create one with [`EventStore::in_memory`], [`EventStore::open`] or
/// [`EventStore::builder`].
///
/// # Example
///
/// ```ignore
/// use cadence::prelude::*;
///
/// let store = EventStore::in_memory(StoreOptions::default());
/// store.append(&StreamKey::new_id(), &[TripStarted { day: 1 }]).await?;
///
/// let fetcher = store
///     .fetcher("trip_summary", ["trip_started"], AsyncOptions::default())
///     .build()?;
/// ```
pub struct EventStore {
    options: StoreOptions,
    graph: Arc<EventGraph>,
    serializer: Arc<dyn Serializer>,
    selector: Arc<dyn EventSelector>,
    log: Arc<dyn EventLog>,
    progression: Arc<dyn ProgressionStore>,
    memory: Option<MemoryLog>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("options", &self.options)
            .field("serializer", &self.serializer.name())
            .field("aliases", &self.graph.aliases())
            .finish()
    }
}

impl EventStore {
    /// Create a store over an in-process log
    pub fn in_memory(options: StoreOptions) -> Self {
        let log = MemoryLog::new(options.stream_identity);
        Self::assemble(options, Arc::new(log.clone()), Arc::new(log.clone()), Some(log))
    }

    /// Open (or create) a SQLite-backed store at `path`
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let log = SqliteLog::open(path, options.stream_identity)?;
        Ok(Self::assemble(options, Arc::new(log.clone()), Arc::new(log), None))
    }

    /// Create a builder for store configuration
    pub fn builder() -> EventStoreBuilder {
        EventStoreBuilder::new()
    }

    fn assemble(
        options: StoreOptions,
        log: Arc<dyn EventLog>,
        progression: Arc<dyn ProgressionStore>,
        memory: Option<MemoryLog>,
    ) -> Self {
        let graph = Arc::new(EventGraph::new());
        let serializer = options.serializer.build();
        let selector = selector_for(
            options.stream_identity,
            Arc::clone(&graph),
            Arc::clone(&serializer),
        );
        info!(
            identity = %options.stream_identity,
            serializer = serializer.name(),
            "event store ready"
        );

        Self {
            options,
            graph,
            serializer,
            selector,
            log,
            progression,
            memory,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Store configuration
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Payload type registry
    pub fn graph(&self) -> &Arc<EventGraph> {
        &self.graph
    }

    /// Payload serializer
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// Row resolver matching the stream identity mode
    pub fn selector(&self) -> &Arc<dyn EventSelector> {
        &self.selector
    }

    /// Log backend
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Checkpoint storage
    pub fn progression(&self) -> &Arc<dyn ProgressionStore> {
        &self.progression
    }

    /// The in-process log, when the store was created with [`EventStore::in_memory`]
    pub fn memory_log(&self) -> Option<&MemoryLog> {
        self.memory.as_ref()
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Register `T` under its default alias and return the alias
    pub fn register<T>(&self) -> Result<String>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        Ok(self.graph.add_event_type::<T>()?.alias().to_string())
    }

    /// Encode a payload for [`append_encoded`](Self::append_encoded)
    pub fn encode<T>(&self, payload: &T) -> Result<NewEvent>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.graph.encode(payload, self.serializer.as_ref())
    }

    /// Append payloads of one type to a stream
    pub async fn append<T>(&self, stream: &StreamKey, payloads: &[T]) -> Result<Vec<u64>>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let events = payloads
            .iter()
            .map(|p| self.encode(p))
            .collect::<Result<Vec<_>>>()?;
        self.append_encoded(stream, None, events).await
    }

    /// Append already encoded events, possibly of mixed types
    pub async fn append_encoded(
        &self,
        stream: &StreamKey,
        tenant_id: Option<&str>,
        events: Vec<NewEvent>,
    ) -> Result<Vec<u64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        self.log.append(stream, tenant_id, events).await
    }

    /// Append encoded events for several streams in one transaction
    pub async fn append_batch(
        &self,
        tenant_id: Option<&str>,
        events: Vec<(StreamKey, NewEvent)>,
    ) -> Result<Vec<u64>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        self.log.append_batch(tenant_id, events).await
    }

    // ========================================================================
    // Projections
    // ========================================================================

    /// Start configuring a fetcher subscribed to `event_types`
    pub fn fetcher<I, S>(&self, name: &str, event_types: I, options: AsyncOptions) -> FetcherBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FetcherBuilder::new(name, Arc::clone(&self.log), Arc::clone(&self.selector))
            .with_settings(self.options.daemon.clone())
            .with_options(options)
            .with_event_types(event_types)
    }

    /// A queued track resuming from the checkpoint stored for `name`
    pub async fn track(&self, name: &str) -> Result<(Arc<QueuedTrack>, TrackReceiver)> {
        QueuedTrack::resume(name, Arc::clone(&self.progression)).await
    }
}

/// Builder for store configuration.
///
/// # Example
///
/// ```ignore
/// let store = EventStore::builder()
///     .stream_identity(StreamIdentity::AsString)
///     .serializer(SerializerKind::MessagePack)
///     .path("./events.db")
///     .open()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventStoreBuilder {
    options: StoreOptions,
    path: Option<PathBuf>,
}

impl EventStoreBuilder {
    /// Create a builder with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every option at once
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the stream identity mode
    pub fn stream_identity(mut self, identity: StreamIdentity) -> Self {
        self.options.stream_identity = identity;
        self
    }

    /// Set the payload serializer
    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.options.serializer = serializer;
        self
    }

    /// Set the daemon settings
    pub fn daemon(mut self, settings: DaemonSettings) -> Self {
        self.options.daemon = settings;
        self
    }

    /// Persist to a SQLite file instead of memory
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Create the store
    pub fn open(self) -> Result<EventStore> {
        self.options.daemon.validate()?;
        match self.path {
            Some(path) => EventStore::open(path, self.options),
            None => Ok(EventStore::in_memory(self.options)),
        }
    }
}

impl From<StoreOptions> for EventStoreBuilder {
    fn from(options: StoreOptions) -> Self {
        Self::new().options(options)
    }
}
