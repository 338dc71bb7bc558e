//! Engine credential resolution boundary.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::TychoConfig;
use crate::error::{Result, TychoError};

/// Maps a workspace to the secret used for its engine runs.
///
/// Implementations typically decrypt a per-workspace key from storage; the
/// contract is only that a missing workspace falls back to the process-wide
/// default, and that resolution fails when neither exists.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, workspace_id: &str) -> Result<String>;
}

/// Fixed in-memory credential map with a process-wide default.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    by_workspace: HashMap<String, String>,
    default_credential: Option<String>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull the process-wide default from configuration.
    pub fn from_config(config: &TychoConfig) -> Self {
        Self {
            by_workspace: HashMap::new(),
            default_credential: config.engine_credential().map(String::from),
        }
    }

    pub fn with_default_credential(mut self, credential: impl Into<String>) -> Self {
        self.default_credential = Some(credential.into());
        self
    }

    pub fn with_workspace_credential(
        mut self,
        workspace_id: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.by_workspace
            .insert(workspace_id.into(), credential.into());
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, workspace_id: &str) -> Result<String> {
        if let Some(credential) = self.by_workspace.get(workspace_id) {
            return Ok(credential.clone());
        }
        self.default_credential.clone().ok_or_else(|| {
            TychoError::Authentication(format!(
                "no engine credential configured for workspace {workspace_id}"
            ))
        })
    }
}
