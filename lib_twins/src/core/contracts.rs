//! # Collaborator Contracts
//!
//! The core depends only on these capabilities. Storage engines, identity
//! services, ID generators and pub/sub transports are supplied by the caller;
//! reference in-memory implementations live in [`crate::connections`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::Result;
use crate::core::model::{Message, Metadata, State, StatesPage, Twin, TwinsPage};

/// Resolves an opaque access token to the caller's identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `TwinsError::UnauthorizedAccess` for unknown tokens.
    async fn identify(&self, token: &str) -> Result<String>;
}

/// Generates unique, never reused identifiers.
pub trait IdProvider: Send + Sync {
    fn id(&self) -> Result<String>;
}

/// Persistence contract for twins.
#[async_trait]
pub trait TwinRepository: Send + Sync {
    /// Stores a new twin. `TwinsError::Conflict` if the ID is taken.
    async fn save(&self, twin: &Twin) -> Result<String>;

    /// Replaces a stored twin. `TwinsError::NotFound` if it is absent.
    async fn update(&self, twin: &Twin) -> Result<()>;

    /// `TwinsError::NotFound` if absent.
    async fn retrieve_by_id(&self, id: &str) -> Result<Twin>;

    /// Owner scoped, filtered and paginated listing.
    async fn retrieve_all(
        &self,
        owner: &str,
        offset: u64,
        limit: u64,
        name: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<TwinsPage>;

    /// Every stored twin regardless of owner, used to rebuild routing.
    async fn retrieve_every(&self) -> Result<Vec<Twin>>;

    /// Removing a missing twin is not an error.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Append-only persistence contract for states.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn save(&self, state: &State) -> Result<()>;

    /// The most recent state of a twin, if any.
    async fn retrieve_last(&self, twin_id: &str) -> Result<Option<State>>;

    /// States of a twin in insertion order with the total count.
    async fn retrieve_all(&self, offset: u64, limit: u64, twin_id: &str) -> Result<StatesPage>;
}

/// Receives messages delivered by the transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Pub/sub transport contract.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, channel: &str, subtopic: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    async fn unsubscribe(&self, channel: &str, subtopic: &str) -> Result<()>;

    async fn publish(&self, message: Message) -> Result<()>;
}
