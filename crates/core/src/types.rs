//! Core identity types
//!
//! This module defines how streams are identified:
//! - [`StreamIdentity`]: store-wide choice between UUID and string stream keys
//! - [`StreamKey`]: the identifier of one stream under that choice

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How streams are keyed in a store
///
/// Fixed once per store configuration; every row in the log uses the same
/// mode, so the resolver variant is chosen once rather than per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamIdentity {
    /// Streams are keyed by a 128-bit UUID
    #[default]
    AsGuid,
    /// Streams are keyed by an opaque string
    AsString,
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamIdentity::AsGuid => f.write_str("guid"),
            StreamIdentity::AsString => f.write_str("string"),
        }
    }
}

/// Identifier of one stream
///
/// Exactly one of the two forms is used per store, matching its
/// [`StreamIdentity`].
///
/// # Examples
///
/// ```
/// use cadence_core::types::{StreamIdentity, StreamKey};
///
/// let key = StreamKey::from("order-42");
/// assert_eq!(key.identity(), StreamIdentity::AsString);
/// assert_eq!(key.as_str(), Some("order-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKey {
    /// UUID-keyed stream
    Id(Uuid),
    /// String-keyed stream
    Key(String),
}

impl StreamKey {
    /// Create a new random UUID stream key
    pub fn new_id() -> Self {
        StreamKey::Id(Uuid::new_v4())
    }

    /// The identity mode this key belongs to
    pub fn identity(&self) -> StreamIdentity {
        match self {
            StreamKey::Id(_) => StreamIdentity::AsGuid,
            StreamKey::Key(_) => StreamIdentity::AsString,
        }
    }

    /// UUID form, if this is a UUID key
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            StreamKey::Id(id) => Some(*id),
            StreamKey::Key(_) => None,
        }
    }

    /// String form, if this is a string key
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StreamKey::Id(_) => None,
            StreamKey::Key(key) => Some(key),
        }
    }
}

impl From<Uuid> for StreamKey {
    fn from(id: Uuid) -> Self {
        StreamKey::Id(id)
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        StreamKey::Key(key.to_string())
    }
}

impl From<String> for StreamKey {
    fn from(key: String) -> Self {
        StreamKey::Key(key)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::Id(id) => write!(f, "{}", id),
            StreamKey::Key(key) => f.write_str(key),
        }
    }
}
