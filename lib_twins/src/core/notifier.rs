//! # Operation Notifier
//!
//! Publishes the outcome of twin operations on a configured channel, using
//! `<operation>.success` / `<operation>.failure` as the subtopic. Without a
//! channel it is a no-op. Publish errors are only logged.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::core::contracts::PubSub;
use crate::core::errors::Result;
use crate::core::model::Message;

pub const PUBLISHER: &str = "twins";

pub struct Notifier {
    pubsub: Arc<dyn PubSub>,
    channel: Option<String>,
}

impl Notifier {
    pub fn new(pubsub: Arc<dyn PubSub>, channel: Option<String>) -> Self {
        Self { pubsub, channel }
    }

    pub async fn notify<T: Serialize>(&self, operation: &str, outcome: &Result<T>) {
        let Some(channel) = &self.channel else {
            return;
        };

        let (suffix, body) = match outcome {
            Ok(value) => ("success", serde_json::to_value(value).unwrap_or_default()),
            Err(e) => ("failure", json!({ "error": e.to_string() })),
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode {} notification: {}", operation, e);
                return;
            }
        };

        let mut message = Message::new(channel.clone(), format!("{}.{}", operation, suffix), payload);
        message.publisher = PUBLISHER.to_string();

        if let Err(e) = self.pubsub.publish(message).await {
            log::warn!("Failed to publish {} notification on '{}': {}", operation, channel, e);
        }
    }
}
