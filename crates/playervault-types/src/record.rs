//! The per-player persisted record and its attribute bag.
//!
//! A [`PlayerRecord`] is the unit of caching and persistence: one exists in
//! memory per online player, and one row exists in the store per player who
//! has ever been persisted. The [`AttributeValue`] bag is the extension
//! point other plugins write their per-player stats into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// A scalar value stored in a player's attribute bag.
///
/// Serialized untagged so the bag persists as plain JSON scalars
/// (`{"score": 10, "afk": false}`) rather than enum wrappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A boolean flag.
    Flag(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    Text(String),
}

impl AttributeValue {
    /// Return the integer value, if this is an [`AttributeValue::Int`].
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Return the value coerced to `f64`, for numeric ordering.
    ///
    /// Integers widen; flags and text have no numeric interpretation.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Flag(_) | Self::Text(_) => None,
        }
    }

    /// Return the string slice, if this is an [`AttributeValue::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Return the flag value, if this is an [`AttributeValue::Flag`].
    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

impl core::fmt::Display for AttributeValue {
    /// Render the bare scalar, the form placeholder consumers expect.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Flag(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

/// One player's persisted state.
///
/// The authoritative in-memory copy lives in the cache while the player is
/// online; the authoritative persisted copy lives in the store. The two are
/// reconciled by the `version` field: every committed save increments it,
/// and a save carrying a stale version is rejected by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Stable unique identifier, immutable, primary key.
    pub player_id: PlayerId,
    /// Last-known human-readable name, refreshed on every join.
    pub display_name: String,
    /// Extensible bag of plugin-specific stats, keys unique.
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Optimistic-concurrency counter. `0` means the record has never been
    /// persisted; each committed save stores `version + 1`.
    pub version: u64,
}

impl PlayerRecord {
    /// Materialize a default record for a player with no prior row.
    pub const fn new(player_id: PlayerId, display_name: String) -> Self {
        Self {
            player_id,
            display_name,
            attributes: BTreeMap::new(),
            version: 0,
        }
    }

    /// Seed the record with default attributes, without overwriting any
    /// key that is already present.
    #[must_use]
    pub fn with_attributes(mut self, defaults: &BTreeMap<String, AttributeValue>) -> Self {
        for (key, value) in defaults {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Look up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Insert or replace an attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Remove an attribute, returning the removed value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }
}
