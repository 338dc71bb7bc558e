//! Session persistence boundary.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Session, SessionPatch};
use crate::error::{Result, TychoError};

/// Where session records live. Implemented by the embedding application;
/// [`MemorySessionRepository`] is provided for tests and single-process use.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Session>>;

    async fn create(&self, session: Session) -> Result<()>;

    /// Apply a partial update to a stored session.
    async fn update(&self, id: &str, patch: SessionPatch) -> Result<()>;
}

/// Process-local session store.
#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn find(&self, id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn create(&self, session: Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn update(&self, id: &str, patch: SessionPatch) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| TychoError::SessionNotFound(id.to_string()))?;
        patch.apply(session);
        Ok(())
    }
}
