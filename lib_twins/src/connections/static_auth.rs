//! Token → identity lookup from a fixed table.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::contracts::IdentityProvider;
use crate::core::errors::{Result, TwinsError};

#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn identify(&self, token: &str) -> Result<String> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(TwinsError::UnauthorizedAccess)
    }
}
