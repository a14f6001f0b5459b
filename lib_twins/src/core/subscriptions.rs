//! # Subscription Manager
//!
//! Keeps the transport subscribed to exactly the routing keys the router holds.
//! Each reconcile compares the live subscriptions with a snapshot of the
//! router's key set and issues the `subscribe`/`unsubscribe` calls that close
//! the gap. The outcome depends only on the router state at snapshot time, so
//! reconciles may run in any order and the last one always converges.
//!
//! Transport failures are logged and swallowed. A twin mutation that already
//! committed must not fail because the broker hiccuped; the failed key is
//! retried by the next reconcile.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::contracts::{MessageHandler, PubSub};
use crate::core::model::RouteKey;
use crate::core::router::SharedRouter;

pub struct SubscriptionManager {
    pubsub: Arc<dyn PubSub>,
    handler: Arc<dyn MessageHandler>,
    router: SharedRouter,
    active: Mutex<HashSet<RouteKey>>,
}

impl SubscriptionManager {
    /// `handler` receives every message delivered on a managed subscription.
    pub fn new(pubsub: Arc<dyn PubSub>, handler: Arc<dyn MessageHandler>, router: SharedRouter) -> Self {
        Self {
            pubsub,
            handler,
            router,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Brings the transport in line with the router.
    ///
    /// The work runs on its own task: dropping the returned future does not
    /// abandon a reconcile halfway.
    pub async fn reconcile(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        if let Err(e) = tokio::spawn(async move { manager.sync().await }).await {
            log::error!("Subscription reconcile task failed: {}", e);
        }
    }

    async fn sync(&self) {
        let mut active = self.active.lock().await;
        let desired = self.router.read().await.keys();

        let mut stale: Vec<RouteKey> = active.difference(&desired).cloned().collect();
        let mut missing: Vec<RouteKey> = desired.difference(&active).cloned().collect();
        stale.sort();
        missing.sort();

        for key in stale {
            match self.pubsub.unsubscribe(&key.channel, &key.subtopic).await {
                Ok(()) => {
                    log::debug!("Unsubscribed from {}/{}", key.channel, key.subtopic);
                    active.remove(&key);
                }
                Err(e) => log::warn!(
                    "Failed to unsubscribe from {}/{}: {}",
                    key.channel,
                    key.subtopic,
                    e
                ),
            }
        }

        for key in missing {
            match self
                .pubsub
                .subscribe(&key.channel, &key.subtopic, Arc::clone(&self.handler))
                .await
            {
                Ok(()) => {
                    log::debug!("Subscribed to {}/{}", key.channel, key.subtopic);
                    active.insert(key);
                }
                Err(e) => log::warn!(
                    "Failed to subscribe to {}/{}: {}",
                    key.channel,
                    key.subtopic,
                    e
                ),
            }
        }
    }

    /// Keys with a live subscription, sorted.
    pub async fn active(&self) -> Vec<RouteKey> {
        let mut keys: Vec<RouteKey> = self.active.lock().await.iter().cloned().collect();
        keys.sort();
        keys
    }
}
