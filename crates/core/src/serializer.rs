//! Payload serializers
//!
//! The log stores payloads as opaque bytes. A [`Serializer`] turns those bytes
//! into a JSON document (and back); the type registry then deserializes the
//! document into the registered payload type.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Converts payload documents to and from stored bytes
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Encode a payload document
    fn to_bytes(&self, document: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode stored bytes into a payload document
    fn from_bytes(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// UTF-8 JSON payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn to_bytes(&self, document: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(document)?)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack payloads (named fields)
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackSerializer;

impl Serializer for MessagePackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn to_bytes(&self, document: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(document)?)
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Serializer selection in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    /// [`JsonSerializer`]
    #[default]
    Json,
    /// [`MessagePackSerializer`]
    MessagePack,
}

impl SerializerKind {
    /// Instantiate the selected serializer
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            SerializerKind::Json => Arc::new(JsonSerializer),
            SerializerKind::MessagePack => Arc::new(MessagePackSerializer),
        }
    }
}
