//! EventGraph: the payload type registry
//!
//! Maps short aliases (stored in the `type` column) to registered payload
//! types, and fully-qualified type descriptors (stored alongside each row) to
//! the same registrations. The descriptor is the fallback used when a row's
//! alias is no longer registered, e.g. after an alias was renamed.
//!
//! ## Concurrency
//!
//! Lookups vastly outnumber registrations. All three indexes are `DashMap`s:
//! sharded, so concurrent resolution from several fetchers never contends on
//! a single lock.

use crate::error::{Error, Result};
use crate::event::{NewEvent, Payload};
use crate::serializer::Serializer;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::sync::Arc;
use uuid::Uuid;

type DecodeFn = fn(serde_json::Value, &Arc<str>) -> Result<Payload>;

fn decode_as<T>(document: serde_json::Value, descriptor: &Arc<str>) -> Result<Payload>
where
    T: DeserializeOwned + Any + Send + Sync,
{
    let value: T = serde_json::from_value(document.clone())?;
    Ok(Payload::new(Arc::clone(descriptor), document, value))
}

/// One registered payload type
#[derive(Clone)]
pub struct EventMapping {
    alias: Arc<str>,
    descriptor: Arc<str>,
    type_id: TypeId,
    decode: DecodeFn,
}

impl EventMapping {
    fn of<T>(alias: &str) -> Self
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        Self {
            alias: Arc::from(alias),
            descriptor: Arc::from(std::any::type_name::<T>()),
            type_id: TypeId::of::<T>(),
            decode: decode_as::<T>,
        }
    }

    /// Alias stored in the `type` column
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Fully-qualified type descriptor
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Decode stored bytes into this mapping's payload type
    pub fn decode(&self, serializer: &dyn Serializer, bytes: &[u8]) -> Result<Payload> {
        let document = serializer.from_bytes(bytes)?;
        (self.decode)(document, &self.descriptor)
    }
}

impl std::fmt::Debug for EventMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMapping")
            .field("alias", &self.alias)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Registry of event payload types
#[derive(Debug, Default)]
pub struct EventGraph {
    by_alias: DashMap<String, EventMapping>,
    by_type: DashMap<TypeId, EventMapping>,
    by_descriptor: DashMap<String, EventMapping>,
}

impl EventGraph {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register `T` under its default alias
    ///
    /// Registering the same type twice is a no-op returning the existing
    /// mapping.
    pub fn add_event_type<T>(&self) -> Result<EventMapping>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        if let Some(existing) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(existing.clone());
        }
        self.add_event_type_with_alias::<T>(&default_alias::<T>())
    }

    /// Register `T` under an explicit alias
    pub fn add_event_type_with_alias<T>(&self, alias: &str) -> Result<EventMapping>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let mapping = EventMapping::of::<T>(alias);

        match self.by_alias.entry(alias.to_string()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if existing.type_id != mapping.type_id {
                    return Err(Error::AmbiguousAlias {
                        alias: alias.to_string(),
                        existing: existing.descriptor().to_string(),
                        requested: mapping.descriptor().to_string(),
                    });
                }
                return Ok(existing.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(mapping.clone());
            }
        }

        self.by_type.insert(mapping.type_id, mapping.clone());
        self.by_descriptor
            .insert(mapping.descriptor().to_string(), mapping.clone());
        Ok(mapping)
    }

    /// Resolve rows recorded under an old descriptor as `T`
    ///
    /// `T` is registered under its default alias first if needed.
    pub fn map_legacy_descriptor<T>(&self, descriptor: &str) -> Result<()>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let mapping = self.add_event_type::<T>()?;
        self.by_descriptor.insert(descriptor.to_string(), mapping);
        Ok(())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Mapping registered under an alias
    pub fn mapping_for_alias(&self, alias: &str) -> Option<EventMapping> {
        self.by_alias.get(alias).map(|m| m.clone())
    }

    /// Mapping for a concrete type
    pub fn mapping_for<T: Any>(&self) -> Option<EventMapping> {
        self.by_type.get(&TypeId::of::<T>()).map(|m| m.clone())
    }

    /// Mapping for a fully-qualified type descriptor
    pub fn mapping_for_descriptor(&self, descriptor: &str) -> Option<EventMapping> {
        self.by_descriptor.get(descriptor).map(|m| m.clone())
    }

    /// Alias of a registered type
    pub fn alias_for<T: Any>(&self) -> Option<String> {
        self.mapping_for::<T>().map(|m| m.alias().to_string())
    }

    /// Every registered alias, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.by_alias.iter().map(|e| e.key().clone()).collect();
        aliases.sort();
        aliases
    }

    /// Resolve a row's payload type
    ///
    /// Tries the alias first, then the recorded descriptor. Fails with
    /// [`Error::UnknownEventType`] when neither is registered.
    pub fn resolve(&self, alias: &str, descriptor: Option<&str>) -> Result<EventMapping> {
        if let Some(mapping) = self.mapping_for_alias(alias) {
            return Ok(mapping);
        }

        descriptor
            .filter(|d| !d.is_empty())
            .and_then(|d| self.mapping_for_descriptor(d))
            .ok_or_else(|| Error::UnknownEventType {
                alias: alias.to_string(),
                descriptor: descriptor.map(str::to_string),
            })
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Serialize a payload for appending, registering its type if needed
    pub fn encode<T>(&self, payload: &T, serializer: &dyn Serializer) -> Result<NewEvent>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let mapping = self.add_event_type::<T>()?;
        let document = serde_json::to_value(payload)?;

        Ok(NewEvent {
            id: Uuid::new_v4(),
            type_name: mapping.alias().to_string(),
            type_descriptor: mapping.descriptor().to_string(),
            data: serializer.to_bytes(&document)?,
        })
    }
}

/// Default alias of a type: its short name in snake_case
///
/// `my_app::events::MembersJoined` becomes `members_joined`.
pub fn default_alias<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    let short = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    to_snake_case(short)
}

fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let acronym_end = i > 0
                && chars[i - 1].is_uppercase()
                && chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            if prev_lower || acronym_end {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
