//! Session state, persistence boundaries, and orchestration.
//!
//! A [`Session`] is one logical conversation with the engine, persisted by a
//! caller-supplied [`SessionRepository`]. [`SessionOrchestrator`] composes
//! the runner, the hook chain, the sandbox manager, and the prompt composer
//! into the per-session state machine.

mod credentials;
mod orchestrator;
mod repository;

pub use credentials::{CredentialResolver, StaticCredentialResolver};
pub use orchestrator::{CreateSessionRequest, EVENT_CHANNEL_CAPACITY, SessionOrchestrator};
pub use repository::{MemorySessionRepository, SessionRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state. `Ended` and `Error` are terminal; nothing transitions
/// out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Error,
}

/// One logical conversation with the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    pub status: SessionStatus,
    /// Skills composed into this session's system prompt, in order.
    pub skill_names: Vec<String>,
    /// Engine-assigned token continuing the underlying conversation. Unset
    /// until the engine's first response.
    pub resumption_token: Option<String>,
    /// Backend identifier of the attached sandbox, if one was created.
    pub sandbox_id: Option<String>,
    /// Soft per-turn ceiling handed to the engine.
    pub max_turns: u32,
    pub turns_used: u32,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Persisted pointer to a sandbox snapshot. Immutable once created;
/// restoring does not consume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    /// Opaque token meaningful only to the backend that minted it.
    pub provider_checkpoint_id: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update to a stored session. `None` fields are left untouched;
/// counter fields carry absolute values, not deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub resumption_token: Option<String>,
    pub sandbox_id: Option<String>,
    pub turns_used: Option<u32>,
    pub tokens_used: Option<u64>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn apply(&self, session: &mut Session) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(token) = &self.resumption_token {
            session.resumption_token = Some(token.clone());
        }
        if let Some(sandbox_id) = &self.sandbox_id {
            session.sandbox_id = Some(sandbox_id.clone());
        }
        if let Some(turns_used) = self.turns_used {
            session.turns_used = turns_used;
        }
        if let Some(tokens_used) = self.tokens_used {
            session.tokens_used = tokens_used;
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
    }
}
