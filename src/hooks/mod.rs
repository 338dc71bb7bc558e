//! Tool-use interception: ordered pre/post hook chains.
//!
//! Hooks are pure policy. Pre-hooks run in registration order immediately
//! before the engine executes a tool; the first block short-circuits the
//! chain and the tool does not run. Post-hooks observe completed tool calls
//! and can never block; their failures are logged and swallowed.

pub mod builtin;

pub use builtin::{AuditLogHook, AuditRecord, ConfirmationHook, DestructiveCommandBlocker};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::TychoError;

/// A tool invocation, observed before execution.
#[derive(Debug, Clone)]
pub struct ToolUseContext {
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub id: Option<String>,
}

/// A tool invocation plus its result, observed after execution.
#[derive(Debug, Clone)]
pub struct ToolOutcomeContext {
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub result: serde_json::Value,
}

/// Verdict of a pre-tool-use hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Block { reason: String },
}

impl HookDecision {
    /// Build a block decision.
    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block {
            reason: reason.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Pre-execution interceptor. Allow is the default verdict.
#[async_trait]
pub trait BeforeToolUse: Send + Sync {
    async fn before_tool_use(&self, ctx: &ToolUseContext) -> HookDecision;
}

/// Post-execution observer. Cannot block; errors are swallowed by the chain.
#[async_trait]
pub trait AfterToolUse: Send + Sync {
    async fn after_tool_use(&self, ctx: &ToolOutcomeContext) -> Result<(), TychoError>;
}

/// Ordered collection of pre/post tool-use hooks.
#[derive(Default, Clone)]
pub struct HookChain {
    before: Vec<Arc<dyn BeforeToolUse>>,
    after: Vec<Arc<dyn AfterToolUse>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-execution hook.
    pub fn with_before(mut self, hook: Arc<dyn BeforeToolUse>) -> Self {
        self.before.push(hook);
        self
    }

    /// Append a post-execution hook.
    pub fn with_after(mut self, hook: Arc<dyn AfterToolUse>) -> Self {
        self.after.push(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Run pre-hooks in registration order. The first block wins and later
    /// hooks are not consulted.
    pub async fn evaluate_before(&self, ctx: &ToolUseContext) -> HookDecision {
        for hook in &self.before {
            if let HookDecision::Block { reason } = hook.before_tool_use(ctx).await {
                return HookDecision::Block { reason };
            }
        }
        HookDecision::Allow
    }

    /// Run every post-hook. A failing post-hook must not abort the run, so
    /// errors are logged and dropped.
    pub async fn notify_after(&self, ctx: &ToolOutcomeContext) {
        for hook in &self.after {
            if let Err(err) = hook.after_tool_use(ctx).await {
                warn!(tool = %ctx.tool_name, error = %err, "post-tool-use hook failed");
            }
        }
    }

    /// The raw `tool_result` message an engine emits in place of executing a
    /// blocked tool. Normalizes into a `tool_result` event carrying the block
    /// reason.
    pub fn blocked_result(ctx: &ToolUseContext, reason: &str) -> serde_json::Value {
        let mut message = serde_json::json!({
            "type": "tool_result",
            "toolName": ctx.tool_name,
            "result": {
                "blocked": true,
                "reason": reason,
            },
        });
        if let Some(id) = &ctx.id {
            message["id"] = serde_json::Value::String(id.clone());
        }
        message
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}
