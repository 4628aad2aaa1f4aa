//! Error types shared by every cadence crate
//!
//! A single [`Error`] enum covers the whole fetch path so that a failure raised
//! deep inside a storage session can travel up through the resolver, the error
//! isolation wrapper and the fetcher loop without re-wrapping.
//!
//! ## Classification
//!
//! | Class | Variants | Handling |
//! |-------|----------|----------|
//! | Transient | `Storage { fault: Connection \| Timeout \| Busy }` | retried by the error handler |
//! | Fatal | everything else | propagated, the polling loop halts |
//!
//! `ConcurrencyConflict` only arises on the write path.
//!
//! `Cancelled` is neither: it reports cooperative shutdown and is never retried.

use std::fmt;
use thiserror::Error;

/// Kind of failure reported by a storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFault {
    /// The connection could not be opened or was lost mid-query
    Connection,
    /// The query did not complete in time
    Timeout,
    /// The store is locked by another writer
    Busy,
    /// The query itself was rejected
    Query,
    /// The schema is missing or incompatible
    Schema,
    /// A stored value could not be decoded
    Decode,
}

impl StorageFault {
    /// Faults that may disappear on their own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageFault::Connection | StorageFault::Timeout | StorageFault::Busy
        )
    }
}

impl fmt::Display for StorageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageFault::Connection => "connection",
            StorageFault::Timeout => "timeout",
            StorageFault::Busy => "busy",
            StorageFault::Query => "query",
            StorageFault::Schema => "schema",
            StorageFault::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// All cadence errors
#[derive(Debug, Error)]
pub enum Error {
    /// A row's type alias is not registered and no fallback descriptor resolves
    #[error("unknown event type '{alias}'")]
    UnknownEventType {
        /// Alias recorded on the row
        alias: String,
        /// Fallback type descriptor recorded on the row, if any
        descriptor: Option<String>,
    },

    /// Two distinct payload types were registered under the same alias
    #[error("alias '{alias}' is already used by {existing}, cannot register {requested}")]
    AmbiguousAlias {
        /// The contested alias
        alias: String,
        /// Descriptor of the type already holding the alias
        existing: String,
        /// Descriptor of the type that was rejected
        requested: String,
    },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure inside a storage backend
    #[error("storage error ({fault}): {message}")]
    Storage {
        /// What went wrong
        fault: StorageFault,
        /// Backend-provided detail
        message: String,
    },

    /// A column was missing or held an unexpected kind of value
    #[error("column '{column}': {reason}")]
    Column {
        /// Column name
        column: &'static str,
        /// Why the read failed
        reason: String,
    },

    /// A lifecycle operation was requested from a state that does not allow it
    #[error("cannot {action} a fetcher in state {state}")]
    InvalidTransition {
        /// Requested operation
        action: &'static str,
        /// State the fetcher was in
        state: String,
    },

    /// A sequence gap did not close within the configured attempt bound
    #[error("sequence gap after {from} did not close after {attempts} attempts (missing {missing:?})")]
    ConvergenceStalled {
        /// Lower (exclusive) bound of the page being fetched
        from: u64,
        /// Sequence numbers still missing
        missing: Vec<u64>,
        /// Attempts made without progress
        attempts: u32,
    },

    /// A stream already has an append in progress
    #[error("stream {stream} already has a pending append")]
    ConcurrencyConflict {
        /// The contested stream
        stream: String,
    },

    /// Transient failures outlasted the retry policy
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The final failure
        last: Box<Error>,
    },

    /// The operation observed a cancellation request
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task panicked
    #[error("background task panicked: {0}")]
    TaskPanicked(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for cadence operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a storage error
    pub fn storage(fault: StorageFault, message: impl Into<String>) -> Self {
        Error::Storage {
            fault,
            message: message.into(),
        }
    }

    /// Create a column read error
    pub fn column(column: &'static str, reason: impl Into<String>) -> Self {
        Error::Column {
            column,
            reason: reason.into(),
        }
    }

    /// Check if this error may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage { fault, .. } => fault.is_transient(),
            _ => false,
        }
    }

    /// Check if this error must halt the polling loop
    pub fn is_fatal(&self) -> bool {
        !self.is_transient() && !self.is_cancelled()
    }

    /// Check if this error reports cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this is a stream concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }

    /// Check if this is an unknown event type error
    pub fn is_unknown_event_type(&self) -> bool {
        matches!(self, Error::UnknownEventType { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
