//! Built-in hooks: destructive-command blocking, audit logging, confirmation.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use regex::Regex;

use super::{AfterToolUse, BeforeToolUse, HookDecision, ToolOutcomeContext, ToolUseContext};
use crate::error::TychoError;

/// The shell-executing tool the destructive blocker watches.
const SHELL_TOOL: &str = "Bash";

fn destructive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)rm\s+-[rf]+",
            r"(?i)DROP\s+TABLE",
            r"(?i)DELETE\s+FROM",
            r"(?i)TRUNCATE\s+TABLE",
            r"(?i)format\s+[a-z]:",
            r"(?i)mkfs",
            r"(?i)dd\s+if=",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("destructive pattern compiles"))
        .collect()
    })
}

/// Blocks destructive shell commands (`rm -rf`, `DROP TABLE`, raw disk
/// writes) before they run. Other tools pass through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DestructiveCommandBlocker;

impl DestructiveCommandBlocker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BeforeToolUse for DestructiveCommandBlocker {
    async fn before_tool_use(&self, ctx: &ToolUseContext) -> HookDecision {
        if ctx.tool_name != SHELL_TOOL {
            return HookDecision::Allow;
        }

        let command = ctx
            .tool_input
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        for pattern in destructive_patterns() {
            if pattern.is_match(command) {
                return HookDecision::block(format!(
                    "Destructive command blocked: {command}. Please confirm with the user \
                     before running destructive operations."
                ));
            }
        }

        HookDecision::Allow
    }
}

/// One audited tool call.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Async sink receiving audit records.
pub type AuditSink =
    Arc<dyn Fn(AuditRecord) -> BoxFuture<'static, Result<(), TychoError>> + Send + Sync>;

/// Records every completed tool call to a caller-supplied sink.
///
/// Sink failures are surfaced to the chain, which logs and swallows them;
/// auditing never aborts a run.
pub struct AuditLogHook {
    sink: AuditSink,
}

impl AuditLogHook {
    pub fn new<F, Fut>(sink: F) -> Self
    where
        F: Fn(AuditRecord) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), TychoError>> + Send + 'static,
    {
        Self {
            sink: Arc::new(move |record| Box::pin(sink(record))),
        }
    }
}

#[async_trait]
impl AfterToolUse for AuditLogHook {
    async fn after_tool_use(&self, ctx: &ToolOutcomeContext) -> Result<(), TychoError> {
        (self.sink)(AuditRecord {
            tool_name: ctx.tool_name.clone(),
            tool_input: ctx.tool_input.clone(),
            result: ctx.result.clone(),
            timestamp: Utc::now(),
        })
        .await
    }
}

/// Async yes/no callback for [`ConfirmationHook`].
pub type ConfirmFn = Arc<dyn Fn(ToolUseContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// Requires confirmation before specific tools may run.
pub struct ConfirmationHook {
    tool_names: Vec<String>,
    confirm: ConfirmFn,
}

impl ConfirmationHook {
    pub fn new<F, Fut>(tool_names: Vec<String>, confirm: F) -> Self
    where
        F: Fn(ToolUseContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Self {
            tool_names,
            confirm: Arc::new(move |ctx| Box::pin(confirm(ctx))),
        }
    }
}

#[async_trait]
impl BeforeToolUse for ConfirmationHook {
    async fn before_tool_use(&self, ctx: &ToolUseContext) -> HookDecision {
        if !self.tool_names.iter().any(|t| t == &ctx.tool_name) {
            return HookDecision::Allow;
        }

        if (self.confirm)(ctx.clone()).await {
            HookDecision::Allow
        } else {
            HookDecision::block(format!("User denied permission for {}", ctx.tool_name))
        }
    }
}
