//! Per-session state machine and the push-stream turn contract.

use std::collections::HashMap;
use std::sync::Arc;

use bon::Builder;
use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Checkpoint, CredentialResolver, Session, SessionPatch, SessionRepository, SessionStatus,
};
use crate::engine::AgentEngine;
use crate::error::{Result, TychoError};
use crate::hooks::{DestructiveCommandBlocker, HookChain};
use crate::runner::{AgentRunner, TokenCapture};
use crate::sandbox::SandboxManager;
use crate::skills::PromptComposer;
use crate::structured::{StructuredOutput, StructuredRunner};
use crate::types::{AgentRunOptions, AgentStreamEvent, DEFAULT_MAX_TURNS};

/// Events buffered between producer and caller before backpressure kicks in.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Hard ceiling on a session's per-turn budget.
const MAX_TURNS_LIMIT: u32 = 50;

/// Parameters for [`SessionOrchestrator::create_session`].
#[derive(Debug, Clone, Builder)]
pub struct CreateSessionRequest {
    #[builder(into)]
    pub workspace_id: String,
    /// Skills composed into the system prompt, in order.
    #[builder(default)]
    pub skill_names: Vec<String>,
    /// Ask for an isolated execution environment. Creation failure is
    /// non-fatal; the session proceeds without one.
    #[builder(default)]
    pub use_sandbox: bool,
    /// Clamped to `1..=50`.
    #[builder(default = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,
}

/// Drives sessions end to end: creation, turns, checkpoints, teardown.
///
/// State machine: `active → ended` on explicit end, `active → error` when a
/// turn terminates with a non-retryable error. Terminal states reject
/// further turns.
pub struct SessionOrchestrator {
    runner: AgentRunner,
    repository: Arc<dyn SessionRepository>,
    credentials: Arc<dyn CredentialResolver>,
    composer: Arc<dyn PromptComposer>,
    sandboxes: Arc<SandboxManager>,
    hooks: Arc<HookChain>,
}

impl SessionOrchestrator {
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        repository: Arc<dyn SessionRepository>,
        credentials: Arc<dyn CredentialResolver>,
        composer: Arc<dyn PromptComposer>,
        sandboxes: Arc<SandboxManager>,
    ) -> Self {
        Self {
            runner: AgentRunner::new(engine),
            repository,
            credentials,
            composer,
            sandboxes,
            hooks: Arc::new(
                HookChain::new().with_before(Arc::new(DestructiveCommandBlocker::new())),
            ),
        }
    }

    /// Replace the hook chain applied to every turn.
    ///
    /// The default chain carries only the destructive-command blocker; a
    /// replacement that still wants it must include it.
    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Create a session in `active` state.
    ///
    /// When a sandbox is requested its creation is best-effort: failures are
    /// logged and the session stays usable without one.
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<Session> {
        let mut session = Session {
            id: Uuid::new_v4().to_string(),
            workspace_id: request.workspace_id,
            status: SessionStatus::Active,
            skill_names: request.skill_names,
            resumption_token: None,
            sandbox_id: None,
            max_turns: request.max_turns.clamp(1, MAX_TURNS_LIMIT),
            turns_used: 0,
            tokens_used: 0,
            created_at: Utc::now(),
            ended_at: None,
        };
        self.repository.create(session.clone()).await?;
        debug!(session_id = %session.id, workspace_id = %session.workspace_id, "session created");

        if request.use_sandbox {
            match self.sandboxes.create(&session.id).await {
                Ok(sandbox) => {
                    self.repository
                        .update(
                            &session.id,
                            SessionPatch {
                                sandbox_id: Some(sandbox.provider_id.clone()),
                                ..Default::default()
                            },
                        )
                        .await?;
                    session.sandbox_id = Some(sandbox.provider_id);
                }
                Err(err) => {
                    warn!(
                        session_id = %session.id,
                        error = %err,
                        "sandbox creation failed, session continues without one"
                    );
                }
            }
        }

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session> {
        self.repository
            .find(session_id)
            .await?
            .ok_or_else(|| TychoError::SessionNotFound(session_id.to_string()))
    }

    /// Run one turn, streaming canonical events to the caller.
    ///
    /// Events arrive in engine order, ending with exactly one terminal
    /// event. The channel is bounded, so a slow caller backpressures the
    /// engine; a dropped receiver stops engine consumption. After the
    /// terminal event the resumption token (if newly observed) and the
    /// turn/token counters are written back to the session in one update.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: impl Into<String>,
    ) -> Result<ReceiverStream<AgentStreamEvent>> {
        let session = self.load_active(session_id).await?;
        let options = self.turn_options(&session, content.into()).await?;

        let mut stream = self.runner.run(options);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let repository = Arc::clone(&self.repository);

        tokio::spawn(async move {
            let mut capture = TokenCapture::new();
            let mut done_turns: u32 = 0;
            let mut done_tokens: u64 = 0;
            let mut fatal_error = false;
            let mut terminal_seen = false;

            while let Some(event) = stream.next().await {
                capture.observe(&event);
                let is_terminal = event.is_terminal();
                match &event {
                    AgentStreamEvent::Done {
                        turns_used,
                        tokens_used,
                    } => {
                        done_turns = turns_used.unwrap_or(0);
                        done_tokens = tokens_used.unwrap_or(0);
                    }
                    AgentStreamEvent::Error { retryable, .. } => {
                        fatal_error = !retryable.unwrap_or(false);
                    }
                    _ => {}
                }
                if is_terminal {
                    terminal_seen = true;
                }
                if tx.send(event).await.is_err() {
                    debug!(session_id = %session.id, "caller disconnected mid-turn");
                    break;
                }
                if is_terminal {
                    break;
                }
            }

            // One write-back per completed turn. An aborted turn (caller
            // gone before the terminal event) commits nothing.
            if terminal_seen {
                let mut patch = SessionPatch {
                    turns_used: Some(session.turns_used + done_turns),
                    tokens_used: Some(session.tokens_used + done_tokens),
                    ..Default::default()
                };
                if let Some(token) = capture.into_inner() {
                    if session.resumption_token.as_deref() != Some(token.as_str()) {
                        patch.resumption_token = Some(token);
                    }
                }
                if fatal_error {
                    patch.status = Some(SessionStatus::Error);
                    patch.ended_at = Some(Utc::now());
                }
                if let Err(err) = repository.update(&session.id, patch).await {
                    warn!(session_id = %session.id, error = %err, "turn write-back failed");
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Run one structured turn, returning the validated value.
    ///
    /// Counter and token write-back happen on success only; a failed
    /// enforcement run leaves the session record untouched.
    pub async fn send_structured<T: DeserializeOwned>(
        &self,
        session_id: &str,
        content: impl Into<String>,
        schema: serde_json::Value,
    ) -> Result<StructuredOutput<T>> {
        let session = self.load_active(session_id).await?;
        let options = self.turn_options(&session, content.into()).await?;

        let structured = StructuredRunner::new(self.runner.clone(), schema);
        let output = structured.run::<T>(options).await?;

        let mut patch = SessionPatch {
            turns_used: Some(session.turns_used + output.turns_used),
            tokens_used: Some(session.tokens_used + output.tokens_used),
            ..Default::default()
        };
        if let Some(token) = &output.resumption_token {
            if session.resumption_token.as_deref() != Some(token.as_str()) {
                patch.resumption_token = Some(token.clone());
            }
        }
        self.repository.update(&session.id, patch).await?;

        Ok(output)
    }

    /// Snapshot the session's sandbox.
    ///
    /// Returns the checkpoint record; persisting it is the caller's job.
    pub async fn create_checkpoint(
        &self,
        session_id: &str,
        label: Option<String>,
    ) -> Result<Checkpoint> {
        let session = self.get_session(session_id).await?;
        if session.sandbox_id.is_none() {
            return Err(TychoError::InvalidState(format!(
                "session {session_id} has no active sandbox"
            )));
        }

        let provider_checkpoint_id = self.sandboxes.checkpoint(session_id).await?;
        Ok(Checkpoint {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            provider_checkpoint_id,
            label,
            created_at: Utc::now(),
        })
    }

    /// Roll the session's sandbox back to a checkpoint.
    pub async fn restore_checkpoint(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<()> {
        // A record for some other session is indistinguishable from a
        // missing one, on purpose.
        if checkpoint.session_id != session_id {
            return Err(TychoError::CheckpointNotFound(checkpoint.id.clone()));
        }
        self.sandboxes
            .restore(session_id, &checkpoint.provider_checkpoint_id)
            .await
    }

    /// End an active session.
    ///
    /// Sandbox teardown is best-effort; the session transitions to `ended`
    /// regardless of destroy outcome.
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        let mut session = self.load_active(session_id).await?;

        if session.sandbox_id.is_some() {
            if let Err(err) = self.sandboxes.destroy(session_id).await {
                warn!(session_id, error = %err, "sandbox destroy failed during end");
            }
        }

        let ended_at = Utc::now();
        self.repository
            .update(
                session_id,
                SessionPatch {
                    status: Some(SessionStatus::Ended),
                    ended_at: Some(ended_at),
                    ..Default::default()
                },
            )
            .await?;

        session.status = SessionStatus::Ended;
        session.ended_at = Some(ended_at);
        Ok(session)
    }

    async fn load_active(&self, session_id: &str) -> Result<Session> {
        let session = self.get_session(session_id).await?;
        if !session.is_active() {
            return Err(TychoError::InvalidState(format!(
                "session {} is {}",
                session.id, session.status
            )));
        }
        Ok(session)
    }

    /// Assemble run options for one turn of this session.
    async fn turn_options(&self, session: &Session, prompt: String) -> Result<AgentRunOptions> {
        let credential = self.credentials.resolve(&session.workspace_id).await?;
        let system_prompt = self.compose_system_prompt(session).await?;

        Ok(AgentRunOptions::builder()
            .prompt(prompt)
            .maybe_resume(session.resumption_token.clone())
            .maybe_system_prompt(system_prompt)
            .credential(credential)
            .max_turns(session.max_turns)
            .hooks(Arc::clone(&self.hooks))
            .build())
    }

    async fn compose_system_prompt(&self, session: &Session) -> Result<Option<String>> {
        if session.skill_names.is_empty() {
            return Ok(None);
        }
        let context = HashMap::from([("WORKSPACE_ID".to_string(), session.workspace_id.clone())]);
        let prompt = self.composer.compose(&session.skill_names, &context).await?;
        Ok(Some(prompt))
    }
}
