use uuid::Uuid;

use crate::core::contracts::IdProvider;
use crate::core::errors::Result;

/// Random (v4) UUID twin identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn id(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}
