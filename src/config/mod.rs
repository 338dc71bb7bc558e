//! Configuration (layered: explicit setters > environment).

use std::fmt;

/// Configuration for Tycho.
///
/// Carries the process-wide engine credential default plus everything the
/// sandbox layer needs to pick a backend. Explicit `with_*` values win over
/// whatever `from_env` found.
#[derive(Clone, Default)]
pub struct TychoConfig {
    engine_credential: Option<String>,
    microvm_token: Option<String>,
    microvm_base_url: Option<String>,
    container_daemon_url: Option<String>,
    container_image: Option<String>,
    dev_mode: bool,
}

impl fmt::Debug for TychoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TychoConfig")
            .field("engine_credential", &self.engine_credential.as_ref().map(|_| ".."))
            .field("microvm_token", &self.microvm_token.as_ref().map(|_| ".."))
            .field("microvm_base_url", &self.microvm_base_url)
            .field("container_daemon_url", &self.container_daemon_url)
            .field("container_image", &self.container_image)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl TychoConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, honoring a `.env` file if present.
    ///
    /// | variable | meaning |
    /// |---|---|
    /// | `ENGINE_API_KEY` | process-wide engine credential fallback |
    /// | `MICROVM_API_TOKEN` | enables the microVM sandbox backend |
    /// | `MICROVM_BASE_URL` | microVM API override |
    /// | `CONTAINER_DAEMON_URL` | container daemon endpoint override |
    /// | `SANDBOX_IMAGE` | container image override |
    /// | `TYCHO_ENV` | `development` selects the no-op sandbox backend |
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        Self {
            engine_credential: std::env::var("ENGINE_API_KEY").ok(),
            microvm_token: std::env::var("MICROVM_API_TOKEN").ok(),
            microvm_base_url: std::env::var("MICROVM_BASE_URL").ok(),
            container_daemon_url: std::env::var("CONTAINER_DAEMON_URL").ok(),
            container_image: std::env::var("SANDBOX_IMAGE").ok(),
            dev_mode: matches!(
                std::env::var("TYCHO_ENV").as_deref(),
                Ok("development") | Ok("dev")
            ),
        }
    }

    /// Set the process-wide engine credential.
    pub fn with_engine_credential(mut self, credential: impl Into<String>) -> Self {
        self.engine_credential = Some(credential.into());
        self
    }

    /// Set the microVM backend token (selects the microVM provider).
    pub fn with_microvm_token(mut self, token: impl Into<String>) -> Self {
        self.microvm_token = Some(token.into());
        self
    }

    /// Override the microVM API base URL.
    pub fn with_microvm_base_url(mut self, url: impl Into<String>) -> Self {
        self.microvm_base_url = Some(url.into());
        self
    }

    /// Override the container daemon endpoint.
    pub fn with_container_daemon_url(mut self, url: impl Into<String>) -> Self {
        self.container_daemon_url = Some(url.into());
        self
    }

    /// Override the container sandbox image.
    pub fn with_container_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = Some(image.into());
        self
    }

    /// Toggle development mode (selects the no-op sandbox provider when the
    /// microVM token is absent).
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn engine_credential(&self) -> Option<&str> {
        self.engine_credential.as_deref()
    }

    pub fn microvm_token(&self) -> Option<&str> {
        self.microvm_token.as_deref()
    }

    pub fn microvm_base_url(&self) -> Option<&str> {
        self.microvm_base_url.as_deref()
    }

    pub fn container_daemon_url(&self) -> Option<&str> {
        self.container_daemon_url.as_deref()
    }

    pub fn container_image(&self) -> Option<&str> {
        self.container_image.as_deref()
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }
}
