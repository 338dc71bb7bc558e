//! MicroVM sandbox backend (remote managed API, bearer auth).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::http::{bearer_headers, response_error, shared_client};
use super::{short_id, SandboxKind, SandboxProvider};
use crate::error::{Result, TychoError};

/// Production endpoint of the managed microVM service.
pub const DEFAULT_MICROVM_BASE_URL: &str = "https://api.machines.dev/v1";

#[derive(Debug, Deserialize)]
struct CheckpointResponse {
    id: String,
}

/// Managed microVM backend. Machines persist across turns and support
/// server-side checkpoint and restore.
#[derive(Debug, Clone)]
pub struct MicrovmProvider {
    token: String,
    base_url: String,
}

impl MicrovmProvider {
    /// Create a provider. Fails fast when the token is empty, since every
    /// call needs it.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(TychoError::Configuration(
                "microVM backend requires an access token".to_string(),
            ));
        }
        Ok(Self {
            token,
            base_url: DEFAULT_MICROVM_BASE_URL.to_string(),
        })
    }

    /// Point at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SandboxProvider for MicrovmProvider {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Microvm
    }

    async fn create(&self, session_id: &str) -> Result<String> {
        let name = format!("agent-{}", short_id(session_id));
        let response = shared_client()
            .post(format!("{}/machines", self.base_url))
            .headers(bearer_headers(&self.token))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        debug!(machine = %name, "microvm created");
        Ok(name)
    }

    async fn checkpoint(&self, provider_id: &str) -> Result<String> {
        let response = shared_client()
            .post(format!(
                "{}/machines/{}/checkpoints",
                self.base_url, provider_id
            ))
            .headers(bearer_headers(&self.token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        let body: CheckpointResponse = response.json().await?;
        debug!(machine = provider_id, checkpoint = %body.id, "microvm checkpointed");
        Ok(body.id)
    }

    async fn restore(&self, provider_id: &str, checkpoint_id: &str) -> Result<()> {
        let response = shared_client()
            .post(format!(
                "{}/machines/{}/checkpoints/{}/restore",
                self.base_url, provider_id, checkpoint_id
            ))
            .headers(bearer_headers(&self.token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        debug!(machine = provider_id, checkpoint = checkpoint_id, "microvm restored");
        Ok(())
    }

    async fn destroy(&self, provider_id: &str) -> Result<()> {
        let response = shared_client()
            .delete(format!("{}/machines/{}", self.base_url, provider_id))
            .headers(bearer_headers(&self.token))
            .send()
            .await?;
        // Gone already is fine.
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        debug!(machine = provider_id, "microvm destroyed");
        Ok(())
    }
}
