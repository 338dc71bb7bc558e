//! Canonical stream event protocol.
//!
//! Every run produces a finite sequence of these events, independent of the
//! external engine's native message format. Exactly one terminal event
//! (`done` or `error`) ends a run; nothing follows it.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Who a `message` event speaks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    /// The engine's own output.
    Engine,
    /// Caller-originated content echoed through the engine.
    Caller,
}

/// Category of an `agent_action` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionType {
    Mutation,
    Analysis,
}

/// One block of `message` content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// The canonical, closed event protocol exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Message {
        role: MessageRole,
        content: Vec<ContentBlock>,
    },
    ToolCall {
        tool_name: String,
        tool_input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolResult {
        tool_name: String,
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentAction {
        action_type: ActionType,
        data: serde_json::Value,
    },
    System {
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turns_used: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_used: Option<u64>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },
}

impl AgentStreamEvent {
    /// Build a single-text-block `message` event.
    pub fn text_message(role: MessageRole, text: impl Into<String>) -> Self {
        Self::Message {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Build a terminal `done` event.
    pub fn done(turns_used: u32, tokens_used: u64) -> Self {
        Self::Done {
            turns_used: Some(turns_used),
            tokens_used: (tokens_used > 0).then_some(tokens_used),
        }
    }

    /// Build a terminal `error` event.
    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self::Error {
            error: message.into(),
            retryable: Some(retryable),
        }
    }

    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
