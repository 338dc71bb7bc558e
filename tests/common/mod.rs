//! Shared test helpers and scripted mock engine.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;

use tycho::engine::{AgentEngine, EngineRequest, RawMessage, RawMessageStream};
use tycho::error::TychoError;
use tycho::hooks::HookChain;
use tycho::types::AgentStreamEvent;

/// One scripted run: raw messages to replay, then an optional mid-stream
/// failure.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRun {
    pub messages: Vec<RawMessage>,
    pub fail_with: Option<String>,
}

/// Snapshot of one request the engine saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub prompt: String,
    pub resume: Option<String>,
    pub system_prompt: Option<String>,
    pub credential: String,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub hooks: Arc<HookChain>,
}

/// Mock engine replaying canned runs in queue order and recording every
/// request it was opened with.
#[derive(Default)]
pub struct ScriptedEngine {
    runs: Mutex<Vec<ScriptedRun>>,
    requests: Mutex<Vec<RecordedRequest>>,
    fail_open: Mutex<Option<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a run that replays `messages` then completes cleanly.
    pub fn queue_run(&self, messages: Vec<RawMessage>) {
        self.runs.lock().unwrap().push(ScriptedRun {
            messages,
            fail_with: None,
        });
    }

    /// Queue a run that replays `messages` then fails mid-stream.
    pub fn queue_failing_run(&self, messages: Vec<RawMessage>, error: &str) {
        self.runs.lock().unwrap().push(ScriptedRun {
            messages,
            fail_with: Some(error.to_string()),
        });
    }

    /// Make the next `open` call itself fail.
    pub fn fail_next_open(&self, error: &str) {
        *self.fail_open.lock().unwrap() = Some(error.to_string());
    }

    /// Everything the engine has been asked to run so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    fn engine_name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: &EngineRequest) -> Result<RawMessageStream, TychoError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            prompt: request.prompt.clone(),
            resume: request.resume.clone(),
            system_prompt: request.system_prompt.clone(),
            credential: request.credential.clone(),
            allowed_tools: request.allowed_tools.clone(),
            max_turns: request.max_turns,
            hooks: Arc::clone(&request.hooks),
        });

        if let Some(error) = self.fail_open.lock().unwrap().take() {
            return Err(TychoError::engine(error));
        }

        let run = {
            let mut runs = self.runs.lock().unwrap();
            if runs.is_empty() {
                ScriptedRun::default()
            } else {
                runs.remove(0)
            }
        };

        let stream = async_stream::stream! {
            for message in run.messages {
                yield Ok(message);
            }
            if let Some(error) = run.fail_with {
                yield Err(TychoError::engine(error));
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Raw `system` message carrying a resumption token.
pub fn raw_system(subtype: &str, session_token: &str) -> RawMessage {
    json!({"type": "system", "subtype": subtype, "session_id": session_token})
}

/// Raw `assistant` message with a single text block.
pub fn raw_assistant_text(text: &str) -> RawMessage {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
}

/// Raw `assistant` message carrying a usage object.
pub fn raw_assistant_with_usage(text: &str, total_tokens: u64) -> RawMessage {
    json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]},
        "usage": {"total_tokens": total_tokens}
    })
}

/// Raw `tool_use` message.
pub fn raw_tool_use(tool_name: &str, input: serde_json::Value, id: &str) -> RawMessage {
    json!({"type": "tool_use", "toolName": tool_name, "toolInput": input, "id": id})
}

/// Raw `tool_result` message.
pub fn raw_tool_result(tool_name: &str, result: serde_json::Value) -> RawMessage {
    json!({"type": "tool_result", "toolName": tool_name, "result": result})
}

/// Drain a stream of canonical events into a vec.
pub async fn collect_events<S>(mut stream: S) -> Vec<AgentStreamEvent>
where
    S: Stream<Item = AgentStreamEvent> + Unpin,
{
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}
