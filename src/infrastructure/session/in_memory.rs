//! In-memory session store using moka

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::session::{SessionContext, SessionId, SessionRepository, SharedSession};
use crate::domain::DomainError;

/// Configuration for the in-memory session store
#[derive(Debug, Clone)]
pub struct InMemorySessionConfig {
    /// Maximum number of live sessions
    pub max_capacity: u64,
    /// Sessions not accessed for this duration are evicted
    pub time_to_idle: Duration,
}

impl Default for InMemorySessionConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            time_to_idle: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl InMemorySessionConfig {
    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = capacity;
        self
    }

    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = tti;
        self
    }
}

/// Session store backed by a moka cache.
///
/// Idle expiry is the only garbage collection sessions get; when the store
/// is full the least recently used session is evicted.
#[derive(Debug, Clone)]
pub struct InMemorySessionRepository {
    sessions: MokaCache<SessionId, SharedSession>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::with_config(InMemorySessionConfig::default())
    }

    pub fn with_config(config: InMemorySessionConfig) -> Self {
        let sessions = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(config.time_to_idle)
            .eviction_listener(|id: Arc<SessionId>, _, cause| {
                debug!(session_id = %id, cause = ?cause, "Session evicted");
            })
            .build();

        Self { sessions }
    }
}

impl Default for InMemorySessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self) -> Result<SharedSession, DomainError> {
        let id = SessionId::generate();
        let session = Arc::new(Mutex::new(SessionContext::new(id)));

        self.sessions.insert(id, session.clone()).await;
        Ok(session)
    }

    async fn get(&self, id: &SessionId) -> Result<Option<SharedSession>, DomainError> {
        Ok(self.sessions.get(id).await)
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, DomainError> {
        Ok(self.sessions.remove(id).await.is_some())
    }

    async fn count(&self) -> Result<u64, DomainError> {
        self.sessions.run_pending_tasks().await;
        Ok(self.sessions.entry_count())
    }

    fn capacity(&self) -> Option<u64> {
        self.sessions.policy().max_capacity()
    }
}
