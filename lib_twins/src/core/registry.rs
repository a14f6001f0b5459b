//! # Twin Registry
//!
//! Owns the twin lifecycle: add, update, view, list and remove, all scoped to
//! the caller's identity. Every mutation runs under a per-twin lock, and the
//! storage commit plus the router patch happen inside one router write lock
//! with no await point between them. Subscriptions are reconciled afterwards
//! against the whole router, so a later reconcile repairs any earlier one that
//! did not run to completion.

use std::sync::Arc;

use chrono::Utc;

use crate::core::contracts::{IdProvider, IdentityProvider, TwinRepository};
use crate::core::errors::{Result, TwinsError};
use crate::core::keyed_lock::KeyedLock;
use crate::core::model::{Definition, Metadata, Twin, TwinsPage};
use crate::core::router::{RouteChange, SharedRouter};
use crate::core::subscriptions::SubscriptionManager;

pub struct TwinRegistry {
    auth: Arc<dyn IdentityProvider>,
    twins: Arc<dyn TwinRepository>,
    ids: Arc<dyn IdProvider>,
    router: SharedRouter,
    subscriptions: Arc<SubscriptionManager>,
    notify_channel: Option<String>,
    locks: KeyedLock,
}

impl TwinRegistry {
    pub fn new(
        auth: Arc<dyn IdentityProvider>,
        twins: Arc<dyn TwinRepository>,
        ids: Arc<dyn IdProvider>,
        router: SharedRouter,
        subscriptions: Arc<SubscriptionManager>,
        notify_channel: Option<String>,
    ) -> Self {
        Self {
            auth,
            twins,
            ids,
            router,
            subscriptions,
            notify_channel,
            locks: KeyedLock::new(),
        }
    }

    /// Stores `twin` owned by the caller with `def` as revision 0.
    pub async fn add_twin(&self, token: &str, twin: Twin, mut def: Definition) -> Result<Twin> {
        let owner = self.auth.identify(token).await?;
        self.check_definition(&def)?;

        let now = Utc::now();
        def.id = 0;
        def.created = now;

        let twin = Twin {
            id: self.ids.id()?,
            owner,
            created: now,
            updated: now,
            revision: 0,
            definitions: vec![def],
            ..twin
        };

        let _guard = self.locks.lock(&twin.id).await;
        self.commit(&twin, true).await?;
        self.subscriptions.reconcile().await;

        log::info!("Twin '{}' added for '{}'", twin.id, twin.owner);
        Ok(twin)
    }

    /// Appends `def` as the next revision and replaces name and metadata.
    pub async fn update_twin(&self, token: &str, twin: Twin, mut def: Definition) -> Result<()> {
        let owner = self.auth.identify(token).await?;

        let _guard = self.locks.lock(&twin.id).await;
        let mut current = self.twins.retrieve_by_id(&twin.id).await?;
        if current.owner != owner {
            return Err(TwinsError::UnauthorizedAccess);
        }
        self.check_definition(&def)?;

        let now = Utc::now();
        current.name = twin.name;
        current.metadata = twin.metadata;
        current.updated = now;
        current.revision += 1;
        def.id = current.revision;
        def.created = now;
        current.definitions.push(def);

        self.commit(&current, false).await?;
        self.subscriptions.reconcile().await;

        log::info!("Twin '{}' updated to revision {}", current.id, current.revision);
        Ok(())
    }

    /// Twins not owned by the caller are reported as missing.
    pub async fn view_twin(&self, token: &str, id: &str) -> Result<Twin> {
        let owner = self.auth.identify(token).await?;
        let twin = self.twins.retrieve_by_id(id).await?;
        if twin.owner != owner {
            return Err(TwinsError::NotFound);
        }
        Ok(twin)
    }

    pub async fn list_twins(
        &self,
        token: &str,
        offset: u64,
        limit: u64,
        name: Option<&str>,
        metadata: Option<&Metadata>,
    ) -> Result<TwinsPage> {
        let owner = self.auth.identify(token).await?;
        self.twins.retrieve_all(&owner, offset, limit, name, metadata).await
    }

    /// Idempotent: missing, already removed and foreign twins all succeed.
    pub async fn remove_twin(&self, token: &str, id: &str) -> Result<()> {
        let owner = self.auth.identify(token).await?;

        let _guard = self.locks.lock(id).await;
        let twin = match self.twins.retrieve_by_id(id).await {
            Ok(twin) => twin,
            Err(TwinsError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        if twin.owner != owner {
            log::debug!("Ignoring removal of twin '{}' not owned by '{}'", id, owner);
            return Ok(());
        }

        let change = {
            let mut router = self.router.write().await;
            self.twins.remove(id).await?;
            router.withdraw(id)
        };
        log::debug!("Twin '{}' released {} routes", id, change.removed.len());
        self.subscriptions.reconcile().await;

        log::info!("Twin '{}' removed", id);
        Ok(())
    }

    /// Rebuilds the router from storage and subscribes to every routed key.
    /// Twins whose routes collide with an earlier twin are skipped.
    pub async fn restore(&self) -> Result<usize> {
        let twins = self.twins.retrieve_every().await?;

        let routes = {
            let mut router = self.router.write().await;
            router.clear();
            for twin in &twins {
                if let Some(def) = twin.current_definition() {
                    if let Err(e) = self.check_definition(def) {
                        log::warn!("Twin '{}' not routed: {}", twin.id, e);
                        continue;
                    }
                }
                if router.check(twin).is_err() {
                    log::warn!("Twin '{}' not routed: conflicting attribute", twin.id);
                    continue;
                }
                router.apply(twin);
            }
            router.len()
        };
        self.subscriptions.reconcile().await;

        log::info!("Restored {} routes from {} twins", routes, twins.len());
        Ok(routes)
    }

    /// Structural checks plus the reserved notification channel, which no
    /// persisted attribute may route from.
    fn check_definition(&self, def: &Definition) -> Result<()> {
        def.validate()?;
        let Some(reserved) = &self.notify_channel else {
            return Ok(());
        };
        match def.attributes.iter().find(|a| a.persist_state && a.channel == *reserved) {
            Some(attr) => Err(TwinsError::MalformedEntity(format!(
                "attribute '{}' persists the notification channel '{}'",
                attr.name, reserved
            ))),
            None => Ok(()),
        }
    }

    async fn commit(&self, twin: &Twin, create: bool) -> Result<()> {
        let change: RouteChange = {
            let mut router = self.router.write().await;
            router.check(twin)?;
            if create {
                self.twins.save(twin).await?;
            } else {
                self.twins.update(twin).await?;
            }
            // No await between the storage commit and the index patch.
            router.apply(twin)
        };
        log::debug!(
            "Twin '{}' routing patched: {} added, {} removed",
            twin.id,
            change.added.len(),
            change.removed.len()
        );
        Ok(())
    }
}
