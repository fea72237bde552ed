//! Session store trait

use async_trait::async_trait;

use super::{SessionId, SharedSession};
use crate::domain::DomainError;

/// Storage for live sessions
#[async_trait]
pub trait SessionRepository: Send + Sync + std::fmt::Debug {
    /// Create and store a fresh session with default settings
    async fn create(&self) -> Result<SharedSession, DomainError>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<SharedSession>, DomainError>;

    /// Remove a session; returns whether it existed
    async fn delete(&self, id: &SessionId) -> Result<bool, DomainError>;

    /// Number of live sessions
    async fn count(&self) -> Result<u64, DomainError>;

    /// Upper bound on live sessions, if the store has one
    fn capacity(&self) -> Option<u64> {
        None
    }
}
