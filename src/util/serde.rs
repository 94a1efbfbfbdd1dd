//! Identifier types shared across the engine and the wire contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task identifier.
pub type TaskId = u64;
/// Job identifier.
pub type JobId = u64;
/// Account identifier.
pub type AccountId = u64;
/// Area identifier.
pub type AreaId = u64;
/// Agent identifier.
pub type AgentId = u64;
/// User identifier.
pub type UserId = u64;
/// Task category identifier (`TaskCategory.category`).
pub type TaskCategoryId = u32;
/// Account category identifier (`AccountCategory.category`).
pub type AccountCategoryId = u32;

/// Correlation token linking a dispatched job to its asynchronous result.
///
/// Generated as a random v4 uuid, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Generate a fresh random track id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
