//! Run options shared by the runner and the structured-output layer.

use std::sync::Arc;

use bon::Builder;

use crate::hooks::HookChain;

/// Default turn ceiling passed to the engine.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Tools the engine may use when the caller does not say otherwise.
pub fn default_allowed_tools() -> Vec<String> {
    ["Read", "Write", "Bash", "Glob", "Grep"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Options for one agent run.
#[derive(Clone, Builder)]
pub struct AgentRunOptions {
    /// The turn prompt.
    #[builder(into)]
    pub prompt: String,
    /// Resumption token from a prior run of the same conversation.
    #[builder(into)]
    pub resume: Option<String>,
    /// System prompt prepended by the engine.
    #[builder(into)]
    pub system_prompt: Option<String>,
    /// Secret handed to the engine for this run.
    #[builder(into)]
    pub credential: String,
    /// Tools the engine is allowed to execute.
    #[builder(default = default_allowed_tools())]
    pub allowed_tools: Vec<String>,
    /// Soft turn budget enforced by the engine.
    #[builder(default = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,
    /// Pre/post tool interception chain, consulted by the engine.
    #[builder(default)]
    pub hooks: Arc<HookChain>,
}
