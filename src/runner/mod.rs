//! Normalization boundary between the engine and the rest of the crate.
//!
//! [`AgentRunner::run`] opens an engine run and re-emits it as canonical
//! [`AgentStreamEvent`]s. Every stream it returns ends with exactly one
//! terminal event (`done` or `error`) no matter how the engine behaves, so
//! downstream consumers never need their own failure handling for the
//! transport.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::debug;

use crate::engine::{AgentEngine, EngineRequest, RawMessage};
use crate::error::is_transient;
use crate::types::{ActionType, AgentRunOptions, AgentStreamEvent, ContentBlock, MessageRole};

/// First-wins capture of the engine-assigned resumption token.
///
/// Feed it every event from a run; the token from the first system event
/// carrying a non-empty one sticks, later system events do not overwrite it.
#[derive(Debug, Default)]
pub struct TokenCapture(Option<String>);

impl TokenCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &AgentStreamEvent) {
        if self.0.is_some() {
            return;
        }
        if let AgentStreamEvent::System {
            session_token: Some(token),
            ..
        } = event
        {
            if !token.is_empty() {
                self.0 = Some(token.clone());
            }
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn into_inner(self) -> Option<String> {
        self.0
    }
}

/// Drives one engine run at a time and normalizes its output.
#[derive(Clone)]
pub struct AgentRunner {
    engine: Arc<dyn AgentEngine>,
}

impl AgentRunner {
    pub fn new(engine: Arc<dyn AgentEngine>) -> Self {
        Self { engine }
    }

    /// Run one turn against the engine.
    ///
    /// The returned stream is infallible: engine failures surface as a
    /// terminal `error` event whose `retryable` flag reflects
    /// [`is_transient`]. Dropping the stream stops engine consumption.
    pub fn run(&self, options: AgentRunOptions) -> BoxStream<'static, AgentStreamEvent> {
        let engine = Arc::clone(&self.engine);
        let stream = async_stream::stream! {
            let request = EngineRequest {
                prompt: options.prompt,
                resume: options.resume,
                system_prompt: options.system_prompt,
                credential: options.credential,
                allowed_tools: options.allowed_tools,
                max_turns: options.max_turns,
                hooks: options.hooks,
            };
            debug!(
                engine = engine.engine_name(),
                resumed = request.resume.is_some(),
                max_turns = request.max_turns,
                "opening agent run"
            );

            let mut raw_stream = match engine.open(&request).await {
                Ok(stream) => stream,
                Err(err) => {
                    let message = err.to_string();
                    let retryable = is_transient(&message);
                    yield AgentStreamEvent::error(message, retryable);
                    return;
                }
            };

            let mut turns_used: u32 = 0;
            let mut tokens_used: u64 = 0;
            let mut capture = TokenCapture::new();

            while let Some(item) = raw_stream.next().await {
                let raw = match item {
                    Ok(raw) => raw,
                    Err(err) => {
                        let message = err.to_string();
                        let retryable = is_transient(&message);
                        yield AgentStreamEvent::error(message, retryable);
                        return;
                    }
                };
                turns_used += 1;
                tokens_used += usage_tokens(&raw);
                if let Some(event) = normalize_raw(&raw) {
                    capture.observe(&event);
                    yield event;
                }
            }

            debug!(
                turns_used,
                tokens_used,
                token_captured = capture.get().is_some(),
                "agent run complete"
            );
            yield AgentStreamEvent::done(turns_used, tokens_used);
        };
        Box::pin(stream)
    }
}

/// Translate one raw engine message into a canonical event.
///
/// Returns `None` for message kinds the protocol does not cover; the runner
/// drops those without breaking the stream.
pub fn normalize_raw(raw: &RawMessage) -> Option<AgentStreamEvent> {
    match raw.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => Some(AgentStreamEvent::Message {
            role: MessageRole::Engine,
            content: parse_content_blocks(raw.pointer("/message/content")),
        }),
        Some("user") => Some(AgentStreamEvent::Message {
            role: MessageRole::Caller,
            content: parse_content_blocks(raw.pointer("/message/content")),
        }),
        Some("tool_use") => Some(AgentStreamEvent::ToolCall {
            tool_name: string_field(raw, "toolName").unwrap_or_default(),
            tool_input: raw
                .get("toolInput")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            id: string_field(raw, "id"),
        }),
        Some("tool_result") => Some(AgentStreamEvent::ToolResult {
            tool_name: string_field(raw, "toolName").unwrap_or_default(),
            result: raw.get("result").cloned().unwrap_or(serde_json::Value::Null),
            id: string_field(raw, "id"),
        }),
        Some("system") => Some(AgentStreamEvent::System {
            subtype: string_field(raw, "subtype").unwrap_or_default(),
            session_token: string_field(raw, "session_id"),
        }),
        Some("agent_action") => {
            let action_type: ActionType = string_field(raw, "actionType")?.parse().ok()?;
            Some(AgentStreamEvent::AgentAction {
                action_type,
                data: raw.get("data").cloned().unwrap_or(serde_json::Value::Null),
            })
        }
        _ => None,
    }
}

fn string_field(raw: &RawMessage, key: &str) -> Option<String> {
    raw.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn parse_content_blocks(value: Option<&serde_json::Value>) -> Vec<ContentBlock> {
    let Some(items) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => Some(ContentBlock::Text {
                text: string_field(item, "text").unwrap_or_default(),
            }),
            Some("tool_use") => Some(ContentBlock::ToolUse {
                id: string_field(item, "id").unwrap_or_default(),
                name: string_field(item, "name").unwrap_or_default(),
                input: item
                    .get("input")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
            }),
            _ => None,
        })
        .collect()
}

/// Tokens consumed by one raw message, read from its `usage` object.
///
/// Prefers an explicit `total_tokens`, otherwise sums input and output
/// counts. Messages without usage cost zero.
fn usage_tokens(raw: &RawMessage) -> u64 {
    let Some(usage) = raw.get("usage") else {
        return 0;
    };
    if let Some(total) = usage.get("total_tokens").and_then(|v| v.as_u64()) {
        return total;
    }
    let input = usage
        .get("input_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output = usage
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    input + output
}
