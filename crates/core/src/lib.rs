//! Core types for cadence
//!
//! This crate defines the vocabulary shared by the storage backends and the
//! projection daemon:
//! - [`Event`], [`EventStream`], [`NewEvent`]: events read from and written to the log
//! - [`EventPage`]: the outcome of one fetch attempt, with gap detection
//! - [`EventGraph`]: payload type registry (alias and descriptor lookups)
//! - [`Serializer`]: payload byte encodings
//! - [`DaemonSettings`], [`AsyncOptions`]: configuration
//! - [`Error`]: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod page;
pub mod serializer;
pub mod types;

pub use config::{AsyncOptions, DaemonSettings, RetryConfig, StallPolicy};
pub use error::{Error, Result, StorageFault};
pub use event::{Event, EventStream, NewEvent, Payload};
pub use graph::{default_alias, EventGraph, EventMapping};
pub use page::EventPage;
pub use serializer::{JsonSerializer, MessagePackSerializer, Serializer, SerializerKind};
pub use types::{StreamIdentity, StreamKey};
