//! # Local Broker
//!
//! In-process pub/sub transport. Each `(channel, subtopic)` has at most one
//! handler. Messages can be published directly or queued through
//! [`LocalBroker::sender`] and drained by [`LocalBroker::run`], which is how a
//! network adapter would feed telemetry in.
//!
//! Handler errors are logged, not returned to the publisher: a broker does
//! not report downstream processing failures back to the device.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::contracts::{MessageHandler, PubSub};
use crate::core::errors::Result;
use crate::core::model::{Message, RouteKey};

pub struct LocalBroker {
    handlers: RwLock<HashMap<RouteKey, Arc<dyn MessageHandler>>>,
    queue_tx: mpsc::UnboundedSender<Message>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            handlers: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Queue handle for adapters feeding inbound messages.
    pub fn sender(&self) -> mpsc::UnboundedSender<Message> {
        self.queue_tx.clone()
    }

    /// Subscribed keys, sorted.
    pub async fn subscriptions(&self) -> Vec<RouteKey> {
        let mut keys: Vec<RouteKey> = self.handlers.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Delivers queued messages until cancelled. Returns how many were delivered.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        let Some(mut rx) = self.queue_rx.lock().await.take() else {
            log::warn!("Local broker delivery loop is already running");
            return 0;
        };

        log::info!("Local broker delivery loop started");
        let mut delivered = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Local broker delivery loop cancelled");
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(message) => {
                            if self.deliver(message).await {
                                delivered += 1;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        // Hand the queue back so the loop can be restarted.
        *self.queue_rx.lock().await = Some(rx);
        delivered
    }

    async fn deliver(&self, message: Message) -> bool {
        let handler = self.handlers.read().await.get(&message.route_key()).cloned();
        let Some(handler) = handler else {
            log::trace!("No subscriber on {}/{}", message.channel, message.subtopic);
            return false;
        };

        let (channel, subtopic) = (message.channel.clone(), message.subtopic.clone());
        if let Err(e) = handler.handle(message).await {
            log::warn!("Handler for {}/{} failed: {}", channel, subtopic, e);
        }
        true
    }
}

#[async_trait]
impl PubSub for LocalBroker {
    async fn subscribe(&self, channel: &str, subtopic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.handlers
            .write()
            .await
            .insert(RouteKey::new(channel, subtopic), handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str, subtopic: &str) -> Result<()> {
        self.handlers
            .write()
            .await
            .remove(&RouteKey::new(channel, subtopic));
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<()> {
        self.deliver(message).await;
        Ok(())
    }
}
