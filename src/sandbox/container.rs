//! Container sandbox backend (local daemon speaking the Docker Engine API).
//!
//! Checkpointing requires a daemon with experimental checkpoint support
//! (CRIU); without it the checkpoint call surfaces the daemon's error.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use super::http::{response_error, shared_client};
use super::{short_id, SandboxKind, SandboxProvider};
use crate::error::Result;

/// Default daemon endpoint (TCP; the daemon must expose its HTTP API).
pub const DEFAULT_CONTAINER_DAEMON_URL: &str = "http://localhost:2375";

/// Image containers are started from unless overridden.
pub const DEFAULT_CONTAINER_IMAGE: &str = "tycho-sandbox:latest";

const MEMORY_LIMIT_BYTES: u64 = 512 * 1024 * 1024;
const STOP_TIMEOUT_SECS: u32 = 5;

#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Local container backend.
#[derive(Debug, Clone)]
pub struct ContainerProvider {
    daemon_url: String,
    image: String,
}

impl Default for ContainerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerProvider {
    pub fn new() -> Self {
        Self {
            daemon_url: DEFAULT_CONTAINER_DAEMON_URL.to_string(),
            image: DEFAULT_CONTAINER_IMAGE.to_string(),
        }
    }

    /// Point at a different daemon endpoint.
    pub fn with_daemon_url(mut self, url: impl Into<String>) -> Self {
        self.daemon_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Start containers from a different image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }
}

#[async_trait]
impl SandboxProvider for ContainerProvider {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Container
    }

    async fn create(&self, session_id: &str) -> Result<String> {
        let name = format!("agent-session-{}", short_id(session_id));
        let response = shared_client()
            .post(format!(
                "{}/containers/create?name={}",
                self.daemon_url, name
            ))
            .json(&serde_json::json!({
                "Image": self.image,
                "HostConfig": {
                    "Memory": MEMORY_LIMIT_BYTES,
                    "AutoRemove": false,
                },
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        let created: CreateContainerResponse = response.json().await?;

        let response = shared_client()
            .post(format!("{}/containers/{}/start", self.daemon_url, created.id))
            .send()
            .await?;
        // 304 means already running.
        if !response.status().is_success() && response.status().as_u16() != 304 {
            return Err(response_error(response).await);
        }
        debug!(container = %created.id, image = %self.image, "container started");
        Ok(created.id)
    }

    async fn checkpoint(&self, provider_id: &str) -> Result<String> {
        let checkpoint_id = format!("cp-{}", Utc::now().timestamp_millis());
        let response = shared_client()
            .post(format!(
                "{}/containers/{}/checkpoints",
                self.daemon_url, provider_id
            ))
            .json(&serde_json::json!({ "CheckpointID": checkpoint_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        debug!(container = provider_id, checkpoint = %checkpoint_id, "container checkpointed");
        Ok(checkpoint_id)
    }

    async fn restore(&self, provider_id: &str, checkpoint_id: &str) -> Result<()> {
        let response = shared_client()
            .post(format!(
                "{}/containers/{}/start?checkpoint={}",
                self.daemon_url, provider_id, checkpoint_id
            ))
            .send()
            .await?;
        if !response.status().is_success() && response.status().as_u16() != 304 {
            return Err(response_error(response).await);
        }
        debug!(container = provider_id, checkpoint = checkpoint_id, "container restored");
        Ok(())
    }

    async fn destroy(&self, provider_id: &str) -> Result<()> {
        // Stop failures (already stopped, never started) do not block removal.
        let stop = shared_client()
            .post(format!(
                "{}/containers/{}/stop?t={}",
                self.daemon_url, provider_id, STOP_TIMEOUT_SECS
            ))
            .send()
            .await;
        match stop {
            Ok(response) if !response.status().is_success() => {
                debug!(
                    container = provider_id,
                    status = response.status().as_u16(),
                    "container stop skipped"
                );
            }
            Err(err) => {
                debug!(container = provider_id, error = %err, "container stop failed");
            }
            _ => {}
        }

        let response = shared_client()
            .delete(format!(
                "{}/containers/{}?force=true",
                self.daemon_url, provider_id
            ))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        debug!(container = provider_id, "container removed");
        Ok(())
    }
}
