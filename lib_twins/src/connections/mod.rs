//! # Connections Module
//!
//! Reference implementations of the collaborators the core talks to: storage,
//! identity, ID generation and the pub/sub transport. They keep everything in
//! process memory, which makes them suitable for tests and single-node runs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::configs::config_twins::TwinsConfig;
use crate::core::service::{Collaborators, TwinsService};

/// In-process pub/sub transport with a queued delivery loop.
pub mod local_broker;
/// In-memory twin and state repositories.
pub mod memory_repo;
/// Fixed token table identity provider.
pub mod static_auth;
/// UUID v4 identifier generation.
pub mod uuid_provider;

pub use local_broker::LocalBroker;
pub use memory_repo::{MemoryStateRepository, MemoryTwinRepository};
pub use static_auth::StaticIdentityProvider;
pub use uuid_provider::UuidProvider;

/// Handles to the in-memory collaborators behind a service.
pub struct MemoryBackend {
    pub broker: Arc<LocalBroker>,
    pub twins: Arc<MemoryTwinRepository>,
    pub states: Arc<MemoryStateRepository>,
}

/// Builds a service over in-memory collaborators. `tokens` maps access tokens
/// to identities.
pub fn memory_service(tokens: HashMap<String, String>, config: &TwinsConfig) -> (TwinsService, MemoryBackend) {
    let backend = MemoryBackend {
        broker: Arc::new(LocalBroker::new()),
        twins: Arc::new(MemoryTwinRepository::new()),
        states: Arc::new(MemoryStateRepository::new()),
    };

    let collab = Collaborators {
        auth: Arc::new(StaticIdentityProvider::new(tokens)),
        twins: backend.twins.clone(),
        states: backend.states.clone(),
        ids: Arc::new(UuidProvider),
        pubsub: backend.broker.clone(),
    };

    (TwinsService::new(collab, config), backend)
}
