//! Storage layer for cadence
//!
//! This crate owns the persisted events table and everything that reads it:
//! - [`EventRow`], [`RowReader`], [`AsyncRowReader`]: column access and result-set consumption
//! - [`EventLog`], [`LogSession`], [`WindowQuery`]: the per-attempt fetch query contract
//! - [`ProgressionStore`]: durable projection checkpoints
//! - [`MemoryLog`]: in-process backend with explicit sequence reservation
//! - [`SqliteLog`]: SQLite backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod log;
pub mod memory;
pub mod row;
pub mod sqlite;

pub use log::{is_settled, EventLog, LogSession, ProgressionStore, WindowQuery, WindowResult};
pub use memory::{MemoryLog, PendingAppend};
pub use row::{AsyncRowReader, Column, EventRow, RowReader, RowSet, StoredRow};
pub use sqlite::{sqlite_error, SqliteLog};
