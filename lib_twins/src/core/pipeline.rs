//! # State Ingestion Pipeline
//!
//! Turns inbound telemetry into states. A message is resolved through the
//! router, its SenML pack decoded, and every record becomes exactly one
//! [`State`]: a snapshot that carries the previous state's payload forward
//! with the routed attribute set to the record's value.
//!
//! The router read lock is held until the states are written, so a message
//! is always stored against the definition that was current when it matched.
//! Ingestion for the same twin is serialized to keep state IDs gap-free;
//! different twins proceed in parallel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map};

use crate::core::contracts::{MessageHandler, StateRepository};
use crate::core::errors::{Result, TwinsError};
use crate::core::keyed_lock::KeyedLock;
use crate::core::model::{Message, State};
use crate::core::notifier::Notifier;
use crate::core::router::SharedRouter;
use crate::core::senml;

pub const SAVE_STATES: &str = "saveStates";

pub struct StatePipeline {
    router: SharedRouter,
    states: Arc<dyn StateRepository>,
    notifier: Arc<Notifier>,
    locks: KeyedLock,
}

impl StatePipeline {
    pub fn new(router: SharedRouter, states: Arc<dyn StateRepository>, notifier: Arc<Notifier>) -> Self {
        Self {
            router,
            states,
            notifier,
            locks: KeyedLock::new(),
        }
    }

    /// Persists one state per record and returns how many were written.
    pub async fn save_states(&self, message: &Message) -> Result<usize> {
        let outcome = self.ingest(message).await;
        let report = outcome.as_ref().map(|saved| {
            json!({
                "channel": message.channel,
                "subtopic": message.subtopic,
                "states": saved,
            })
        });
        self.notifier.notify(SAVE_STATES, &report.map_err(Clone::clone)).await;
        outcome
    }

    async fn ingest(&self, message: &Message) -> Result<usize> {
        let router = self.router.read().await;
        let Some(route) = router.resolve(&message.channel, &message.subtopic) else {
            log::debug!(
                "No twin routes {}/{}, dropping message",
                message.channel,
                message.subtopic
            );
            return Err(TwinsError::NotFound);
        };

        let records = senml::decode(&message.payload)?;
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.locks.lock(&route.twin_id).await;
        let mut last = self.states.retrieve_last(&route.twin_id).await?;

        for rec in &records {
            let (id, mut payload) = match last.take() {
                Some(prev) => (prev.id + 1, prev.payload),
                None => (0, Map::new()),
            };
            payload.insert(route.attribute.name.clone(), rec.value.clone());

            let state = State {
                twin_id: route.twin_id.clone(),
                id,
                definition: route.revision,
                created: rec.time.unwrap_or_else(Utc::now),
                payload,
            };
            self.states.save(&state).await?;
            last = Some(state);
        }

        log::debug!(
            "Saved {} states for twin '{}' attribute '{}'",
            records.len(),
            route.twin_id,
            route.attribute.name
        );
        Ok(records.len())
    }
}

#[async_trait]
impl MessageHandler for StatePipeline {
    async fn handle(&self, message: Message) -> Result<()> {
        self.save_states(&message).await.map(|_| ())
    }
}
