//! Convenience re-exports for common use.

pub use crate::config::TychoConfig;
pub use crate::engine::{AgentEngine, EngineRequest, RawMessage, RawMessageStream};
pub use crate::error::{Result, TychoError};
pub use crate::hooks::{
    AfterToolUse, BeforeToolUse, DestructiveCommandBlocker, HookChain, HookDecision,
    ToolOutcomeContext, ToolUseContext,
};
pub use crate::runner::AgentRunner;
pub use crate::sandbox::{SandboxKind, SandboxManager, SandboxProvider, SandboxSession};
pub use crate::session::{
    Checkpoint, CreateSessionRequest, CredentialResolver, MemorySessionRepository, Session,
    SessionOrchestrator, SessionPatch, SessionRepository, SessionStatus, StaticCredentialResolver,
};
pub use crate::skills::{PromptComposer, SkillMeta, SkillStore};
pub use crate::structured::{StructuredOutput, StructuredRunner};
pub use crate::types::{
    AgentRunOptions, AgentStreamEvent, ContentBlock, MessageRole,
};
