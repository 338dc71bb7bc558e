//! Sandbox lifecycle management for agent sessions.
//!
//! Sessions can run inside an isolated execution environment. Three
//! interchangeable backends cover the deployment spectrum: managed microVMs
//! (production), a local container daemon (self-hosted), and a no-op stub
//! (environments without isolation tooling). [`SandboxManager`] owns the
//! session-id registry and routes lifecycle calls to the configured backend.

mod container;
mod http;
mod microvm;
mod noop;

pub use container::{ContainerProvider, DEFAULT_CONTAINER_DAEMON_URL, DEFAULT_CONTAINER_IMAGE};
pub use microvm::{DEFAULT_MICROVM_BASE_URL, MicrovmProvider};
pub use noop::NoopProvider;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::config::TychoConfig;
use crate::error::{Result, TychoError};

/// Which backend a sandbox lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SandboxKind {
    Microvm,
    Container,
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    Noop,
}

/// Registry entry for one session's sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSession {
    pub session_id: String,
    pub provider: SandboxKind,
    /// Backend-assigned identifier (machine name, container id, or stub id).
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}

/// One sandbox backend.
///
/// Providers speak in backend identifiers; session-id bookkeeping lives in
/// [`SandboxManager`]. Checkpoint tokens are opaque to everything but the
/// provider that minted them.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn kind(&self) -> SandboxKind;

    /// Allocate an environment, returning its backend identifier.
    async fn create(&self, session_id: &str) -> Result<String>;

    /// Snapshot the environment, returning an opaque checkpoint token.
    async fn checkpoint(&self, provider_id: &str) -> Result<String>;

    /// Apply a previously minted checkpoint token.
    async fn restore(&self, provider_id: &str, checkpoint_id: &str) -> Result<()>;

    /// Tear the environment down. A backend "not found" means
    /// already-destroyed and is not an error.
    async fn destroy(&self, provider_id: &str) -> Result<()>;
}

/// First eight characters of a session id, used in backend resource names.
pub(crate) fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

/// Routes sandbox lifecycle operations to the configured backend and tracks
/// live sandboxes by session id.
///
/// The registry is process-local; restarting the process orphans remote
/// environments, which must then be reaped out of band.
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    sessions: RwLock<HashMap<String, SandboxSession>>,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Pick a backend from configuration.
    ///
    /// A microVM token selects the microVM backend; otherwise development
    /// mode selects the no-op backend; otherwise the container daemon is
    /// used.
    pub fn from_config(config: &TychoConfig) -> Result<Self> {
        let provider: Arc<dyn SandboxProvider> = if let Some(token) = config.microvm_token() {
            let mut provider = MicrovmProvider::new(token)?;
            if let Some(base_url) = config.microvm_base_url() {
                provider = provider.with_base_url(base_url);
            }
            Arc::new(provider)
        } else if config.dev_mode() {
            Arc::new(NoopProvider)
        } else {
            let mut provider = ContainerProvider::new();
            if let Some(url) = config.container_daemon_url() {
                provider = provider.with_daemon_url(url);
            }
            if let Some(image) = config.container_image() {
                provider = provider.with_image(image);
            }
            Arc::new(provider)
        };
        Ok(Self::new(provider))
    }

    /// The configured backend's kind.
    pub fn kind(&self) -> SandboxKind {
        self.provider.kind()
    }

    /// Allocate an environment for `session_id` and record it.
    ///
    /// No dedup is performed; calling this twice for a live session is the
    /// caller's bug and the second descriptor replaces the first.
    pub async fn create(&self, session_id: &str) -> Result<SandboxSession> {
        let provider_id = self.provider.create(session_id).await?;
        let session = SandboxSession {
            session_id: session_id.to_string(),
            provider: self.provider.kind(),
            provider_id,
            created_at: Utc::now(),
        };
        debug!(
            session_id,
            provider = %session.provider,
            provider_id = %session.provider_id,
            "sandbox created"
        );
        self.write_sessions()
            .insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    /// Snapshot the session's environment, returning the backend's opaque
    /// checkpoint token. Persisting that token is the caller's job.
    pub async fn checkpoint(&self, session_id: &str) -> Result<String> {
        let session = self
            .get(session_id)
            .ok_or_else(|| TychoError::SandboxNotFound(session_id.to_string()))?;
        self.provider.checkpoint(&session.provider_id).await
    }

    /// Apply a checkpoint token to the session's environment.
    pub async fn restore(&self, session_id: &str, checkpoint_id: &str) -> Result<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| TychoError::SandboxNotFound(session_id.to_string()))?;
        self.provider
            .restore(&session.provider_id, checkpoint_id)
            .await
    }

    /// Tear down the session's environment, best-effort.
    ///
    /// The registry entry is removed before the backend call so a flaky
    /// remote can never leave it stuck; backend failures are logged and
    /// swallowed. Unknown session ids are a no-op, so calling this twice is
    /// always safe.
    pub async fn destroy(&self, session_id: &str) -> Result<()> {
        let Some(session) = self.write_sessions().remove(session_id) else {
            return Ok(());
        };
        if let Err(err) = self.provider.destroy(&session.provider_id).await {
            warn!(
                session_id,
                provider_id = %session.provider_id,
                error = %err,
                "sandbox destroy failed, entry dropped anyway"
            );
        }
        Ok(())
    }

    /// Current registry entry for a session, if any.
    pub fn get(&self, session_id: &str) -> Option<SandboxSession> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SandboxSession>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}
