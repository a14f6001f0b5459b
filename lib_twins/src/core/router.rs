//! # Attribute Router
//!
//! Index from `(channel, subtopic)` to the twin and attribute that persist
//! messages arriving there. Only the current definition of each twin and only
//! attributes flagged `persist_state` are indexed.
//!
//! The registry owns the router and patches it inside the same write-locked
//! section that commits a definition change; the ingestion pipeline holds a
//! read handle. Lookups therefore never observe a superseded definition.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::errors::{Result, TwinsError};
use crate::core::model::{Attribute, RouteKey, Twin};

/// Router shared between the registry (writer) and the pipeline (reader).
pub type SharedRouter = Arc<RwLock<AttributeRouter>>;

/// Where a message is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub twin_id: String,
    pub attribute: Attribute,
    /// Revision of the definition the attribute belongs to.
    pub revision: u64,
}

/// Keys whose routing changed after a patch. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteChange {
    pub added: Vec<RouteKey>,
    pub removed: Vec<RouteKey>,
}

impl RouteChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AttributeRouter {
    routes: HashMap<RouteKey, Route>,
    by_twin: HashMap<String, HashSet<RouteKey>>,
}

impl AttributeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRouter {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn resolve(&self, channel: &str, subtopic: &str) -> Option<&Route> {
        self.routes.get(&RouteKey::new(channel, subtopic))
    }

    /// Fails with `Conflict` when a persisted key of `twin` is routed to another twin.
    pub fn check(&self, twin: &Twin) -> Result<()> {
        for key in twin.persisted_keys() {
            if let Some(route) = self.routes.get(&key) {
                if route.twin_id != twin.id {
                    log::warn!(
                        "Route {}/{} already claimed by twin '{}', rejecting twin '{}'",
                        key.channel,
                        key.subtopic,
                        route.twin_id,
                        twin.id
                    );
                    return Err(TwinsError::Conflict);
                }
            }
        }
        Ok(())
    }

    /// Replaces the routes of `twin` with those of its current definition.
    pub fn apply(&mut self, twin: &Twin) -> RouteChange {
        let new_keys = twin.persisted_keys();
        let old_keys = self.by_twin.remove(&twin.id).unwrap_or_default();

        let mut removed: Vec<RouteKey> = old_keys.difference(&new_keys).cloned().collect();
        let mut added: Vec<RouteKey> = new_keys.difference(&old_keys).cloned().collect();
        removed.sort();
        added.sort();

        for key in &removed {
            self.drop_route(key, &twin.id);
        }

        if let Some(def) = twin.current_definition() {
            for attr in def.attributes.iter().filter(|a| a.persist_state) {
                self.routes.insert(
                    attr.route_key(),
                    Route {
                        twin_id: twin.id.clone(),
                        attribute: attr.clone(),
                        revision: twin.revision,
                    },
                );
            }
        }

        if !new_keys.is_empty() {
            self.by_twin.insert(twin.id.clone(), new_keys);
        }

        RouteChange { added, removed }
    }

    /// Removes every route of a twin.
    pub fn withdraw(&mut self, twin_id: &str) -> RouteChange {
        let mut removed: Vec<RouteKey> = self
            .by_twin
            .remove(twin_id)
            .unwrap_or_default()
            .into_iter()
            .collect();
        removed.sort();

        for key in &removed {
            self.drop_route(key, twin_id);
        }

        RouteChange {
            added: Vec::new(),
            removed,
        }
    }

    /// Every routed key.
    pub fn keys(&self) -> HashSet<RouteKey> {
        self.routes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
        self.by_twin.clear();
    }

    fn drop_route(&mut self, key: &RouteKey, twin_id: &str) {
        if self.routes.get(key).is_some_and(|r| r.twin_id == twin_id) {
            self.routes.remove(key);
        }
    }
}
