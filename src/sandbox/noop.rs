//! No-op sandbox backend for environments without isolation tooling.

use async_trait::async_trait;
use chrono::Utc;

use super::{SandboxKind, SandboxProvider};
use crate::error::Result;

/// Stub backend. Allocates nothing, accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvider;

#[async_trait]
impl SandboxProvider for NoopProvider {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Noop
    }

    async fn create(&self, session_id: &str) -> Result<String> {
        Ok(format!("noop-{session_id}"))
    }

    async fn checkpoint(&self, _provider_id: &str) -> Result<String> {
        Ok(format!("noop-checkpoint-{}", Utc::now().timestamp_millis()))
    }

    async fn restore(&self, _provider_id: &str, _checkpoint_id: &str) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self, _provider_id: &str) -> Result<()> {
        Ok(())
    }
}
