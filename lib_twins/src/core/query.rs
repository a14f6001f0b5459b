//! # Query Engine
//!
//! Paginated state retrieval. Unlike the write paths, an unknown or foreign
//! twin is not an error here: the caller simply gets an empty page.

use std::sync::Arc;

use crate::core::contracts::{IdentityProvider, StateRepository, TwinRepository};
use crate::core::errors::{Result, TwinsError};
use crate::core::model::StatesPage;

pub struct StateQuery {
    auth: Arc<dyn IdentityProvider>,
    twins: Arc<dyn TwinRepository>,
    states: Arc<dyn StateRepository>,
}

impl StateQuery {
    pub fn new(
        auth: Arc<dyn IdentityProvider>,
        twins: Arc<dyn TwinRepository>,
        states: Arc<dyn StateRepository>,
    ) -> Self {
        Self { auth, twins, states }
    }

    pub async fn list_states(&self, token: &str, offset: u64, limit: u64, twin_id: &str) -> Result<StatesPage> {
        let owner = self.auth.identify(token).await?;

        match self.twins.retrieve_by_id(twin_id).await {
            Ok(twin) if twin.owner == owner => self.states.retrieve_all(offset, limit, twin_id).await,
            Ok(_) | Err(TwinsError::NotFound) => Ok(StatesPage::empty(offset, limit)),
            Err(e) => Err(e),
        }
    }
}
