//! Contract required from the external agent execution engine.
//!
//! Tycho does not implement an engine; it drives one. An engine opens a run,
//! executes the conversation (including tool use) on its own, and streams
//! back loosely-typed, engine-native JSON messages. All interpretation of
//! those messages happens in one place, the [`runner`](crate::runner)
//! normalization boundary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TychoError;
use crate::hooks::HookChain;

/// An engine-native message, before normalization.
///
/// Recognized `type` values are `assistant`, `user`, `tool_use`,
/// `tool_result`, `system`, and `agent_action`; anything else is dropped by
/// the normalizer. Messages may carry a `usage` object whose token counts the
/// runner accumulates.
pub type RawMessage = serde_json::Value;

/// Lazily-produced sequence of raw engine messages for one run.
pub type RawMessageStream = BoxStream<'static, Result<RawMessage, TychoError>>;

/// What the runner hands the engine to open one run.
#[derive(Clone)]
pub struct EngineRequest {
    /// The turn prompt.
    pub prompt: String,
    /// Resumption token continuing a prior conversation, when present.
    pub resume: Option<String>,
    /// System prompt, already composed.
    pub system_prompt: Option<String>,
    /// Secret authenticating this run against the engine.
    pub credential: String,
    /// Tools the engine may execute.
    pub allowed_tools: Vec<String>,
    /// Soft turn ceiling the engine enforces.
    pub max_turns: u32,
    /// Interception chain. The engine must call
    /// [`HookChain::evaluate_before`] ahead of each tool execution and, on a
    /// block, emit [`HookChain::blocked_result`] instead of running the tool;
    /// it must call [`HookChain::notify_after`] once a tool has run.
    pub hooks: Arc<HookChain>,
}

/// The external agent execution engine.
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Engine name, for logging.
    fn engine_name(&self) -> &str;

    /// Open a run. The returned stream is finite, non-restartable, and does
    /// no more work than the consumer has demanded.
    async fn open(&self, request: &EngineRequest) -> Result<RawMessageStream, TychoError>;
}
