//! # Twins Service
//!
//! Facade wiring the registry, router, pipeline, query engine and
//! subscription manager over one set of collaborators. This is the API
//! callers and transport adapters use.

use std::sync::Arc;

use serde_json::json;

use crate::configs::config_twins::TwinsConfig;
use crate::core::contracts::{IdProvider, IdentityProvider, PubSub, StateRepository, TwinRepository};
use crate::core::errors::Result;
use crate::core::model::{Definition, Message, Metadata, RouteKey, StatesPage, Twin, TwinsPage};
use crate::core::notifier::Notifier;
use crate::core::pipeline::StatePipeline;
use crate::core::query::StateQuery;
use crate::core::registry::TwinRegistry;
use crate::core::router::{AttributeRouter, Route, SharedRouter};
use crate::core::subscriptions::SubscriptionManager;

pub const ADD_TWIN: &str = "addTwin";
pub const UPDATE_TWIN: &str = "updateTwin";
pub const REMOVE_TWIN: &str = "removeTwin";

/// External capabilities the service is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn IdentityProvider>,
    pub twins: Arc<dyn TwinRepository>,
    pub states: Arc<dyn StateRepository>,
    pub ids: Arc<dyn IdProvider>,
    pub pubsub: Arc<dyn PubSub>,
}

pub struct TwinsService {
    registry: TwinRegistry,
    router: SharedRouter,
    pipeline: Arc<StatePipeline>,
    query: StateQuery,
    subscriptions: Arc<SubscriptionManager>,
    notifier: Arc<Notifier>,
}

impl TwinsService {
    pub fn new(collab: Collaborators, config: &TwinsConfig) -> Self {
        let router = AttributeRouter::shared();
        let notifier = Arc::new(Notifier::new(
            Arc::clone(&collab.pubsub),
            config.notify_channel.clone(),
        ));
        let pipeline = Arc::new(StatePipeline::new(
            Arc::clone(&router),
            Arc::clone(&collab.states),
            Arc::clone(&notifier),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&collab.pubsub),
            pipeline.clone(),
            Arc::clone(&router),
        ));
        let registry = TwinRegistry::new(
            Arc::clone(&collab.auth),
            Arc::clone(&collab.twins),
            Arc::clone(&collab.ids),
            Arc::clone(&router),
            Arc::clone(&subscriptions),
            config.notify_channel.clone(),
        );
        let query = StateQuery::new(collab.auth, collab.twins, collab.states);

        Self {
            registry,
            router,
            pipeline,
            query,
            subscriptions,
            notifier,
        }
    }

    pub async fn add_twin(&self, token: &str, twin: Twin, def: Definition) -> Result<Twin> {
        let outcome = self.registry.add_twin(token, twin, def).await;
        self.notifier.notify(ADD_TWIN, &outcome).await;
        outcome
    }

    pub async fn update_twin(&self, token: &str, twin: Twin, def: Definition) -> Result<()> {
        let id = twin.id.clone();
        let outcome = self.registry.update_twin(token, twin, def).await;
        self.notifier
            .notify(UPDATE_TWIN, &outcome.clone().map(|()| json!({ "id": id })))
            .await;
        outcome
    }

    pub async fn view_twin(&self, token: &str, id: &str) -> Result<Twin> {
        self.registry.view_twin(token, id).await
    }

    pub async fn list_twins(
        &self,
        token: &str,
        offset: u64,
        limit: u64,
        name: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<TwinsPage> {
        self.registry.list_twins(token, offset, limit, name, metadata).await
    }

    pub async fn remove_twin(&self, token: &str, id: &str) -> Result<()> {
        let outcome = self.registry.remove_twin(token, id).await;
        self.notifier
            .notify(REMOVE_TWIN, &outcome.clone().map(|()| json!({ "id": id })))
            .await;
        outcome
    }

    pub async fn save_states(&self, message: &Message) -> Result<usize> {
        self.pipeline.save_states(message).await
    }

    pub async fn list_states(&self, token: &str, offset: u64, limit: u64, twin_id: &str) -> Result<StatesPage> {
        self.query.list_states(token, offset, limit, twin_id).await
    }

    /// Rebuilds routing and subscriptions from stored twins. Call once at startup.
    pub async fn restore(&self) -> Result<usize> {
        self.registry.restore().await
    }

    pub async fn resolve(&self, channel: &str, subtopic: &str) -> Option<Route> {
        self.router.read().await.resolve(channel, subtopic).cloned()
    }

    /// Routing keys the transport is currently subscribed to.
    pub async fn subscriptions(&self) -> Vec<RouteKey> {
        self.subscriptions.active().await
    }

    /// The handler to register with transports that deliver telemetry.
    pub fn handler(&self) -> Arc<StatePipeline> {
        Arc::clone(&self.pipeline)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::connections::{memory_service, MemoryBackend};
    use crate::core::contracts::MessageHandler;
    use crate::core::errors::TwinsError;
    use crate::core::model::Attribute;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::{Mutex, Semaphore};

    const TOKEN: &str = "token";
    const OTHER_TOKEN: &str = "other-token";

    fn service(config: &TwinsConfig) -> (TwinsService, MemoryBackend) {
        let tokens = HashMap::from([
            (TOKEN.to_string(), "user@example.com".to_string()),
            (OTHER_TOKEN.to_string(), "other@example.com".to_string()),
        ]);
        memory_service(tokens, config)
    }

    fn attr(name: &str, subtopic: &str, persist: bool) -> Attribute {
        Attribute {
            name: name.to_string(),
            channel: "chan".to_string(),
            subtopic: subtopic.to_string(),
            persist_state: persist,
        }
    }

    fn senml(n: usize) -> Vec<u8> {
        let recs: Vec<_> = (0..n).map(|i| json!({"n": "temperature", "v": i as f64})).collect();
        serde_json::to_vec(&recs).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: Message) -> Result<()> {
            self.seen.lock().await.push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_appends_revision_and_reroutes() {
        let (svc, backend) = service(&TwinsConfig::default());
        let twin = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();
        assert_eq!(backend.broker.subscriptions().await, vec![RouteKey::new("chan", "engine")]);

        let mut changed = twin.clone();
        changed.name = "pump".to_string();
        svc.update_twin(TOKEN, changed, Definition::new(vec![attr("hum", "chassis", true)]))
            .await
            .unwrap();

        let stored = svc.view_twin(TOKEN, &twin.id).await.unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.name, "pump");
        assert_eq!(stored.definitions.len(), 2);
        assert_eq!(stored.definitions[0].attributes[0].name, "temp");
        assert_eq!(stored.definitions[1].id, 1);

        assert!(svc.resolve("chan", "engine").await.is_none());
        assert_eq!(svc.resolve("chan", "chassis").await.unwrap().revision, 1);
        assert_eq!(backend.broker.subscriptions().await, vec![RouteKey::new("chan", "chassis")]);
        assert_eq!(svc.subscriptions().await, vec![RouteKey::new("chan", "chassis")]);
    }

    #[tokio::test]
    async fn test_update_by_other_owner_is_unauthorized() {
        let (svc, _) = service(&TwinsConfig::default());
        let twin = svc.add_twin(TOKEN, Twin::default(), Definition::default()).await.unwrap();

        let res = svc.update_twin(OTHER_TOKEN, twin.clone(), Definition::default()).await;
        assert_eq!(res, Err(TwinsError::UnauthorizedAccess));
        assert_eq!(svc.view_twin(OTHER_TOKEN, &twin.id).await, Err(TwinsError::NotFound));
        assert_eq!(svc.view_twin(TOKEN, &twin.id).await.unwrap().revision, 0);
    }

    #[tokio::test]
    async fn test_route_collision_is_conflict() {
        let (svc, backend) = service(&TwinsConfig::default());
        let first = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();

        let res = svc
            .add_twin(OTHER_TOKEN, Twin::default(), Definition::new(vec![attr("t", "engine", true)]))
            .await;
        assert_eq!(res, Err(TwinsError::Conflict));

        let page = svc.list_twins(OTHER_TOKEN, 0, 10, None, None).await.unwrap();
        assert_eq!(page.page.total, 0);
        assert_eq!(svc.resolve("chan", "engine").await.unwrap().twin_id, first.id);

        // A non-persisted attribute on the same pair does not route, so no conflict.
        svc.add_twin(OTHER_TOKEN, Twin::default(), Definition::new(vec![attr("t", "engine", false)]))
            .await
            .unwrap();
        assert_eq!(backend.twins.retrieve_every().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_pair_in_definition_is_malformed() {
        let (svc, backend) = service(&TwinsConfig::default());
        let def = Definition::new(vec![attr("a", "engine", true), attr("b", "engine", true)]);
        let res = svc.add_twin(TOKEN, Twin::default(), def).await;
        assert!(matches!(res, Err(TwinsError::MalformedEntity(_))));
        assert!(backend.twins.retrieve_every().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_withdraws_routes_and_subscriptions() {
        let (svc, backend) = service(&TwinsConfig::default());
        let twin = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();

        // Not the owner: tolerated, nothing removed.
        svc.remove_twin(OTHER_TOKEN, &twin.id).await.unwrap();
        assert!(svc.resolve("chan", "engine").await.is_some());

        svc.remove_twin(TOKEN, &twin.id).await.unwrap();
        assert!(svc.resolve("chan", "engine").await.is_none());
        assert!(backend.broker.subscriptions().await.is_empty());

        let msg = Message::new("chan", "engine", senml(3));
        assert_eq!(svc.save_states(&msg).await, Err(TwinsError::NotFound));
    }

    #[tokio::test]
    async fn test_states_snapshot_previous_payload() {
        let (svc, _) = service(&TwinsConfig::default());
        let def = Definition::new(vec![attr("temperature", "engine", true), attr("humidity", "chassis", true)]);
        let twin = svc.add_twin(TOKEN, Twin::default(), def).await.unwrap();

        svc.save_states(&Message::new("chan", "engine", senml(2))).await.unwrap();
        let hum = serde_json::to_vec(&json!([{"n": "humidity", "v": 40.0}])).unwrap();
        svc.save_states(&Message::new("chan", "chassis", hum)).await.unwrap();

        let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
        let ids: Vec<u64> = page.states.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let last = &page.states[2];
        assert_eq!(last.payload.get("temperature"), Some(&json!(1.0)));
        assert_eq!(last.payload.get("humidity"), Some(&json!(40.0)));
        assert!(page.states.iter().all(|s| s.definition == 0));
    }

    #[tokio::test]
    async fn test_states_record_active_revision() {
        let (svc, _) = service(&TwinsConfig::default());
        let def = Definition::new(vec![attr("temperature", "engine", true)]);
        let twin = svc.add_twin(TOKEN, Twin::default(), def.clone()).await.unwrap();

        svc.save_states(&Message::new("chan", "engine", senml(1))).await.unwrap();
        svc.update_twin(TOKEN, twin.clone(), def).await.unwrap();
        svc.save_states(&Message::new("chan", "engine", senml(1))).await.unwrap();

        let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
        let revisions: Vec<u64> = page.states.iter().map(|s| s.definition).collect();
        assert_eq!(revisions, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_malformed_payload_saves_nothing() {
        let (svc, backend) = service(&TwinsConfig::default());
        svc.add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();

        let res = svc.save_states(&Message::new("chan", "engine", b"not senml".to_vec())).await;
        assert!(matches!(res, Err(TwinsError::MalformedEntity(_))));
        assert_eq!(backend.states.count().await, 0);
    }

    #[tokio::test]
    async fn test_broker_delivery_feeds_pipeline() {
        let (svc, backend) = service(&TwinsConfig::default());
        let twin = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temperature", "engine", true)]))
            .await
            .unwrap();

        backend.broker.publish(Message::new("chan", "engine", senml(4))).await.unwrap();
        backend.broker.publish(Message::new("chan", "wheel", senml(4))).await.unwrap();

        let page = svc.list_states(TOKEN, 0, 10, &twin.id).await.unwrap();
        assert_eq!(page.page.total, 4);
    }

    #[tokio::test]
    async fn test_notifications_published_on_configured_channel() {
        let config = TwinsConfig {
            notify_channel: Some("twins-events".to_string()),
            ..Default::default()
        };
        let (svc, backend) = service(&config);
        let recorder = Arc::new(Recorder::default());
        for subtopic in ["addTwin.success", "addTwin.failure", "removeTwin.success", "saveStates.failure"] {
            backend
                .broker
                .subscribe("twins-events", subtopic, recorder.clone())
                .await
                .unwrap();
        }

        let twin = svc.add_twin(TOKEN, Twin::default(), Definition::default()).await.unwrap();
        let _ = svc.add_twin("bad-token", Twin::default(), Definition::default()).await;
        svc.remove_twin(TOKEN, &twin.id).await.unwrap();
        let _ = svc.save_states(&Message::new("chan", "nowhere", senml(1))).await;

        let seen = recorder.seen.lock().await;
        let subtopics: Vec<&str> = seen.iter().map(|m| m.subtopic.as_str()).collect();
        assert_eq!(
            subtopics,
            vec!["addTwin.success", "addTwin.failure", "removeTwin.success", "saveStates.failure"]
        );
        let added: Twin = serde_json::from_slice(&seen[0].payload).unwrap();
        assert_eq!(added.id, twin.id);
        assert!(seen.iter().all(|m| m.publisher == "twins"));
    }

    #[tokio::test]
    async fn test_restore_rebuilds_routes_from_storage() {
        let (svc, backend) = service(&TwinsConfig::default());
        svc.add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();

        // A fresh service over the same storage starts with an empty index.
        let collab = Collaborators {
            auth: Arc::new(crate::connections::StaticIdentityProvider::default().with_token(TOKEN, "user@example.com")),
            twins: backend.twins.clone(),
            states: backend.states.clone(),
            ids: Arc::new(crate::connections::UuidProvider),
            pubsub: Arc::new(crate::connections::LocalBroker::new()),
        };
        let restarted = TwinsService::new(collab, &TwinsConfig::default());
        assert!(restarted.resolve("chan", "engine").await.is_none());

        assert_eq!(restarted.restore().await.unwrap(), 1);
        assert!(restarted.resolve("chan", "engine").await.is_some());
        assert_eq!(restarted.subscriptions().await, vec![RouteKey::new("chan", "engine")]);
    }

    /// Broker whose subscribe on "slow" waits for a permit.
    struct GatedPubSub {
        gate: Semaphore,
        subscribed: Mutex<Vec<RouteKey>>,
    }

    #[async_trait]
    impl PubSub for GatedPubSub {
        async fn subscribe(&self, channel: &str, subtopic: &str, _handler: Arc<dyn MessageHandler>) -> Result<()> {
            if subtopic == "slow" {
                self.gate.acquire().await.unwrap().forget();
            }
            self.subscribed.lock().await.push(RouteKey::new(channel, subtopic));
            Ok(())
        }

        async fn unsubscribe(&self, channel: &str, subtopic: &str) -> Result<()> {
            let key = RouteKey::new(channel, subtopic);
            self.subscribed.lock().await.retain(|k| k != &key);
            Ok(())
        }

        async fn publish(&self, _message: Message) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropped_mutation_still_subscribes_its_routes() {
        let pubsub = Arc::new(GatedPubSub {
            gate: Semaphore::new(0),
            subscribed: Mutex::new(Vec::new()),
        });
        let collab = Collaborators {
            auth: Arc::new(crate::connections::StaticIdentityProvider::default().with_token(TOKEN, "user@example.com")),
            twins: Arc::new(crate::connections::MemoryTwinRepository::new()),
            states: Arc::new(crate::connections::MemoryStateRepository::new()),
            ids: Arc::new(crate::connections::UuidProvider),
            pubsub: pubsub.clone(),
        };
        let svc = Arc::new(TwinsService::new(collab, &TwinsConfig::default()));

        // The first add blocks inside the transport while subscribing.
        let first = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move {
                svc.add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("s", "slow", true)]))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The second add commits, then its caller gives up while the reconcile waits.
        let second = tokio::time::timeout(
            Duration::from_millis(20),
            svc.add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)])),
        )
        .await;
        assert!(second.is_err());
        assert!(svc.resolve("chan", "engine").await.is_some());

        pubsub.gate.add_permits(1);
        first.await.unwrap().unwrap();

        let mut subscribed = Vec::new();
        for _ in 0..50 {
            subscribed = pubsub.subscribed.lock().await.clone();
            subscribed.sort();
            if subscribed.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(subscribed, vec![RouteKey::new("chan", "engine"), RouteKey::new("chan", "slow")]);
        assert_eq!(svc.subscriptions().await, subscribed);
    }

    #[tokio::test]
    async fn test_key_released_and_reclaimed_stays_subscribed() {
        let (svc, backend) = service(&TwinsConfig::default());
        let first = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();
        svc.remove_twin(TOKEN, &first.id).await.unwrap();
        let second = svc
            .add_twin(OTHER_TOKEN, Twin::default(), Definition::new(vec![attr("t", "engine", true)]))
            .await
            .unwrap();

        assert_eq!(backend.broker.subscriptions().await, vec![RouteKey::new("chan", "engine")]);
        backend.broker.publish(Message::new("chan", "engine", senml(2))).await.unwrap();
        let page = svc.list_states(OTHER_TOKEN, 0, 10, &second.id).await.unwrap();
        assert_eq!(page.page.total, 2);
    }

    #[tokio::test]
    async fn test_notification_channel_cannot_be_persisted() {
        let config = TwinsConfig {
            notify_channel: Some("chan".to_string()),
            ..Default::default()
        };
        let (svc, backend) = service(&config);

        let res = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("loop", "saveStates.success", true)]))
            .await;
        assert!(matches!(res, Err(TwinsError::MalformedEntity(_))));

        // Observing the channel without persisting it is allowed.
        let twin = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("seen", "saveStates.success", false)]))
            .await
            .unwrap();
        let res = svc
            .update_twin(TOKEN, twin, Definition::new(vec![attr("loop", "saveStates.success", true)]))
            .await;
        assert!(matches!(res, Err(TwinsError::MalformedEntity(_))));
        assert!(backend.broker.subscriptions().await.iter().all(|k| k.subtopic != "saveStates.success"));
    }

    #[tokio::test]
    async fn test_update_of_missing_twin_is_not_found_before_validation() {
        let (svc, _) = service(&TwinsConfig::default());
        let missing = Twin {
            id: "missing".to_string(),
            ..Default::default()
        };
        let def = Definition::new(vec![attr("a", "engine", true), attr("b", "engine", true)]);
        assert_eq!(svc.update_twin(TOKEN, missing, def).await, Err(TwinsError::NotFound));
    }

    #[tokio::test]
    async fn test_relative_record_time_is_stored_near_now() {
        let (svc, _) = service(&TwinsConfig::default());
        let twin = svc
            .add_twin(TOKEN, Twin::default(), Definition::new(vec![attr("temp", "engine", true)]))
            .await
            .unwrap();

        let before = chrono::Utc::now();
        let pack = serde_json::to_vec(&json!([{"n": "temp", "v": 1, "t": -5}])).unwrap();
        svc.save_states(&Message::new("chan", "engine", pack)).await.unwrap();

        let state = &svc.list_states(TOKEN, 0, 1, &twin.id).await.unwrap().states[0];
        let age = before - state.created;
        assert!(age >= chrono::Duration::seconds(4) && age <= chrono::Duration::seconds(6));
    }
}
