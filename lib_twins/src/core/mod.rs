//! # Core Engine Module
//!
//! The twin data model and the message driven state engine.
//!
//! ## Core Components:
//!
//! - **`registry`**: twin lifecycle and owner-scoped access control. Commits
//!   definition changes and patches the router in the same critical section.
//!
//! - **`router`**: the `(channel, subtopic)` → twin/attribute index derived from
//!   each twin's current definition.
//!
//! - **`pipeline`**: decodes SenML telemetry and persists one state per record.
//!
//! - **`query`**: paginated, tolerant state retrieval.
//!
//! - **`subscriptions`**: keeps transport subscriptions in line with the router.
//!
//! - **`service`**: the facade that wires all of the above over a set of
//!   [`contracts`] implementations.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod contracts;
pub mod errors;
/// Per-key async mutual exclusion.
pub mod keyed_lock;
pub mod model;
/// Outcome notifications published on a configured channel.
pub mod notifier;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod router;
/// SenML (RFC 8428) pack decoding.
pub mod senml;
pub mod service;
pub mod subscriptions;

// --- Public API Re-exports ---
pub use contracts::{IdProvider, IdentityProvider, MessageHandler, PubSub, StateRepository, TwinRepository};
pub use errors::{Result, TwinsError};
pub use model::{
    Attribute, Definition, Message, Metadata, PageMetadata, RouteKey, State, StatesPage, Twin, TwinsPage,
};
pub use pipeline::StatePipeline;
pub use query::StateQuery;
pub use registry::TwinRegistry;
pub use router::{AttributeRouter, Route, RouteChange, SharedRouter};
pub use service::{Collaborators, TwinsService};
pub use subscriptions::SubscriptionManager;
