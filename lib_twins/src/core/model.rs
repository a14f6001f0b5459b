//! # Twin Data Model
//!
//! Twins, their revisioned definitions, attributes and the states recorded for
//! them. Definitions are append-only snapshots: an update pushes a new
//! [`Definition`] and advances [`Twin::revision`], so any [`State`] can still be
//! read against the definition that produced it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::{Result, TwinsError};

/// Free-form twin metadata. Stored and returned unchanged.
pub type Metadata = Map<String, Value>;

/// Routing coordinates of a telemetry stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub channel: String,
    pub subtopic: String,
}

impl RouteKey {
    pub fn new(channel: impl Into<String>, subtopic: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            subtopic: subtopic.into(),
        }
    }
}

/// Binding of a property name to a channel and subtopic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub name: String,
    pub channel: String,
    pub subtopic: String,
    /// Whether messages matching this attribute produce states.
    pub persist_state: bool,
}

impl Attribute {
    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(self.channel.clone(), self.subtopic.clone())
    }
}

/// A versioned set of attributes. Immutable once appended to a twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// The revision this definition was stored under.
    pub id: u64,
    pub created: DateTime<Utc>,
    pub attributes: Vec<Attribute>,
}

impl Default for Definition {
    fn default() -> Self {
        Self {
            id: 0,
            created: Utc::now(),
            attributes: Vec::new(),
        }
    }
}

impl Definition {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            ..Default::default()
        }
    }

    /// Rejects definitions that bind the same channel and subtopic twice.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if !seen.insert(attr.route_key()) {
                return Err(TwinsError::MalformedEntity(format!(
                    "attribute '{}' reuses channel '{}' subtopic '{}'",
                    attr.name, attr.channel, attr.subtopic
                )));
            }
        }
        Ok(())
    }

    /// Routing keys of the attributes whose messages are persisted.
    pub fn persisted_keys(&self) -> HashSet<RouteKey> {
        self.attributes
            .iter()
            .filter(|attr| attr.persist_state)
            .map(Attribute::route_key)
            .collect()
    }
}

/// A virtual entity mirroring a physical device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Twin {
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Revision of the current definition.
    pub revision: u64,
    pub definitions: Vec<Definition>,
}

impl Default for Twin {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            owner: String::new(),
            name: String::new(),
            metadata: Metadata::new(),
            created: now,
            updated: now,
            revision: 0,
            definitions: Vec::new(),
        }
    }
}

impl Twin {
    /// The definition at the current revision, if any was ever stored.
    pub fn current_definition(&self) -> Option<&Definition> {
        self.definitions.last()
    }

    /// Persisted routing keys of the current definition.
    pub fn persisted_keys(&self) -> HashSet<RouteKey> {
        self.current_definition()
            .map(Definition::persisted_keys)
            .unwrap_or_default()
    }

    /// True when every filter pair is present in the metadata.
    pub fn matches_metadata(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// One snapshot of a twin, derived from a single measurement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub twin_id: String,
    /// Per-twin sequence number, starting at 0.
    pub id: u64,
    /// Revision of the definition active when the state was recorded.
    pub definition: u64,
    pub created: DateTime<Utc>,
    /// Attribute name to last known measurement value.
    pub payload: Map<String, Value>,
}

/// Inbound telemetry as delivered by the pub/sub transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub subtopic: String,
    pub publisher: String,
    /// Raw SenML JSON pack.
    pub payload: Vec<u8>,
    pub created: DateTime<Utc>,
}

impl Message {
    pub fn new(channel: impl Into<String>, subtopic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            subtopic: subtopic.into(),
            publisher: String::new(),
            payload,
            created: Utc::now(),
        }
    }

    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(self.channel.clone(), self.subtopic.clone())
    }
}

/// Pagination window echoed back with every page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl PageMetadata {
    /// Index range of `offset`/`limit` within `len` items.
    pub fn window(&self, len: usize) -> std::ops::Range<usize> {
        let start = usize::try_from(self.offset).unwrap_or(usize::MAX).min(len);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        start..start.saturating_add(limit).min(len)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwinsPage {
    #[serde(flatten)]
    pub page: PageMetadata,
    pub twins: Vec<Twin>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatesPage {
    #[serde(flatten)]
    pub page: PageMetadata,
    pub states: Vec<State>,
}

impl StatesPage {
    pub fn empty(offset: u64, limit: u64) -> Self {
        Self {
            page: PageMetadata {
                total: 0,
                offset,
                limit,
            },
            states: Vec::new(),
        }
    }
}
