//! Structured output: run the agent until its response validates as a type.
//!
//! [`StructuredRunner`] wraps an [`AgentRunner`] and enforces typed JSON
//! output over it. Each attempt runs a full agent turn, collects the
//! engine-authored text, extracts a JSON candidate, and deserializes it into
//! the target type. Rejections feed the validation error back into the next
//! attempt's prompt so the model can correct itself.

use std::sync::OnceLock;

use futures::StreamExt;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Result, TychoError};
use crate::runner::{AgentRunner, TokenCapture};
use crate::types::{AgentRunOptions, AgentStreamEvent, ContentBlock, MessageRole};

/// Default attempt budget before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const NO_JSON_FEEDBACK: &str = "Response did not contain a valid JSON object";

/// A validated structured response plus the run metadata that produced it.
#[derive(Debug, Clone)]
pub struct StructuredOutput<T> {
    /// The deserialized value.
    pub value: T,
    /// The full engine-authored text of the accepted attempt.
    pub raw_text: String,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
    /// Engine turns across all attempts.
    pub turns_used: u32,
    /// Tokens across all attempts.
    pub tokens_used: u64,
    /// Resumption token captured during the accepted attempt, if the engine
    /// issued one.
    pub resumption_token: Option<String>,
}

/// Runs agent turns until the response deserializes into the target type.
#[derive(Clone)]
pub struct StructuredRunner {
    runner: AgentRunner,
    schema: serde_json::Value,
    max_attempts: u32,
}

impl StructuredRunner {
    /// Create a structured runner advertising `schema` to the model.
    ///
    /// The schema is instructional only; acceptance is decided by
    /// deserializing into the caller's type.
    pub fn new(runner: AgentRunner, schema: serde_json::Value) -> Self {
        Self {
            runner,
            schema,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Run until the engine produces output deserializing into `T`.
    ///
    /// Validation failures are retried with feedback, up to the attempt
    /// budget. Engine failures are not retried; the terminal `error` event
    /// becomes an [`TychoError::Engine`] immediately. An exhausted budget
    /// yields [`TychoError::StructuredOutput`] carrying the last feedback.
    pub async fn run<T: DeserializeOwned>(
        &self,
        options: AgentRunOptions,
    ) -> Result<StructuredOutput<T>> {
        let instructions = build_json_instructions(&self.schema);
        let system_prompt = match &options.system_prompt {
            Some(existing) => format!("{existing}\n\n{instructions}"),
            None => instructions,
        };
        let base_prompt = options.prompt.clone();

        let mut last_error = String::from("no attempts were made");
        let mut attempts: u32 = 0;
        let mut turns_used: u32 = 0;
        let mut tokens_used: u64 = 0;

        while attempts < self.max_attempts {
            let prompt = if attempts > 0 {
                format!(
                    "{base_prompt}\n\nYour previous response was invalid. Error: {last_error}\nPlease respond with valid JSON matching the schema."
                )
            } else {
                base_prompt.clone()
            };
            attempts += 1;
            debug!(attempt = attempts, max_attempts = self.max_attempts, "structured attempt");

            let mut attempt_options = options.clone();
            attempt_options.prompt = prompt;
            attempt_options.system_prompt = Some(system_prompt.clone());

            let mut text_parts: Vec<String> = Vec::new();
            let mut capture = TokenCapture::new();
            let mut stream = self.runner.run(attempt_options);
            while let Some(event) = stream.next().await {
                capture.observe(&event);
                match event {
                    AgentStreamEvent::Message {
                        role: MessageRole::Engine,
                        content,
                    } => {
                        for block in content {
                            if let ContentBlock::Text { text } = block {
                                text_parts.push(text);
                            }
                        }
                    }
                    AgentStreamEvent::Done {
                        turns_used: turns,
                        tokens_used: tokens,
                    } => {
                        turns_used += turns.unwrap_or(0);
                        tokens_used += tokens.unwrap_or(0);
                    }
                    AgentStreamEvent::Error { error, .. } => {
                        return Err(TychoError::engine(error));
                    }
                    _ => {}
                }
            }

            let raw_text = text_parts.concat();
            match extract_json(&raw_text) {
                Some(candidate) => match serde_json::from_value::<T>(candidate) {
                    Ok(value) => {
                        return Ok(StructuredOutput {
                            value,
                            raw_text,
                            attempts,
                            turns_used,
                            tokens_used,
                            resumption_token: capture.into_inner(),
                        });
                    }
                    Err(err) => last_error = err.to_string(),
                },
                None => last_error = String::from(NO_JSON_FEEDBACK),
            }
            warn!(attempt = attempts, error = %last_error, "structured attempt rejected");
        }

        Err(TychoError::StructuredOutput {
            attempts,
            last_error,
        })
    }
}

/// Extract a JSON value from free-form model text.
///
/// A fenced ```` ```json ```` block is preferred; failing that, the span
/// from the first `{` to the last `}` is tried. Returns `None` when neither
/// parses.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("fence pattern compiles")
    });

    if let Some(captures) = fence.captures(text) {
        if let Some(inner) = captures.get(1) {
            if let Ok(value) = serde_json::from_str(inner.as_str().trim()) {
                return Some(value);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start < end {
        if let Ok(value) = serde_json::from_str(&text[start..=end]) {
            return Some(value);
        }
    }

    None
}

fn build_json_instructions(schema: &serde_json::Value) -> String {
    format!(
        "## Output Format\n\n\
         You MUST respond ONLY with a JSON object wrapped in a ```json code block.\n\
         Do not include any prose before or after the JSON block.\n\n\
         Required schema:\n\
         ```json\n{}\n```\n\n\
         Example response format:\n\
         ```json\n{{ \"field\": \"...\" }}\n```",
        serde_json::to_string_pretty(schema).unwrap_or_default()
    )
}
