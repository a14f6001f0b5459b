//! # Twins Error Taxonomy
//!
//! Every fallible operation in the core returns [`TwinsError`]. The first four
//! variants are the domain taxonomy callers match on; `Storage` and `Transport`
//! carry collaborator failures through verbatim, since the core never retries.

use thiserror::Error;

/// Result type for twins operations.
pub type Result<T> = std::result::Result<T, TwinsError>;

/// Errors surfaced by the registry, ingestion pipeline and query engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TwinsError {
    /// The access token could not be resolved, or the caller does not own the twin.
    #[error("missing or invalid credentials provided")]
    UnauthorizedAccess,

    /// A twin is missing on a write path, or no attribute routes the message.
    #[error("non-existent entity")]
    NotFound,

    /// A uniqueness violation, e.g. a routing pair already claimed by another twin.
    #[error("entity already exists")]
    Conflict,

    /// The entity or measurement payload could not be accepted.
    #[error("malformed entity specification: {0}")]
    MalformedEntity(String),

    /// A storage collaborator failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The pub/sub transport failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for TwinsError {
    fn from(err: serde_json::Error) -> Self {
        TwinsError::MalformedEntity(err.to_string())
    }
}
