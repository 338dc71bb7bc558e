//! End-to-end tests for the session orchestrator.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;
use tycho::engine::AgentEngine;
use tycho::error::TychoError;
use tycho::hooks::{HookChain, HookDecision, ToolUseContext};
use tycho::sandbox::{NoopProvider, SandboxKind, SandboxManager, SandboxProvider};
use tycho::session::{
    CreateSessionRequest, MemorySessionRepository, Session, SessionOrchestrator,
    SessionRepository, SessionStatus, StaticCredentialResolver,
};
use tycho::skills::SkillStore;
use tycho::types::{AgentStreamEvent, DEFAULT_MAX_TURNS};

struct Harness {
    engine: Arc<ScriptedEngine>,
    repository: Arc<MemorySessionRepository>,
    sandboxes: Arc<SandboxManager>,
    orchestrator: SessionOrchestrator,
    skills_dir: TempDir,
}

fn harness() -> Harness {
    harness_with_provider(Arc::new(NoopProvider))
}

fn harness_with_provider(provider: Arc<dyn SandboxProvider>) -> Harness {
    let skills_dir = tempfile::tempdir().expect("tempdir");
    let engine = Arc::new(ScriptedEngine::new());
    let repository = Arc::new(MemorySessionRepository::new());
    let sandboxes = Arc::new(SandboxManager::new(provider));
    let orchestrator = SessionOrchestrator::new(
        Arc::clone(&engine) as Arc<dyn AgentEngine>,
        Arc::clone(&repository) as Arc<dyn SessionRepository>,
        Arc::new(StaticCredentialResolver::new().with_default_credential("sk-test")),
        Arc::new(SkillStore::new(skills_dir.path())),
        Arc::clone(&sandboxes),
    );
    Harness {
        engine,
        repository,
        sandboxes,
        orchestrator,
        skills_dir,
    }
}

impl Harness {
    fn add_skill(&self, name: &str, content: &str) {
        std::fs::write(self.skills_dir.path().join(format!("{name}.md")), content)
            .expect("skill written");
    }

    async fn stored(&self, session_id: &str) -> Session {
        self.repository
            .find(session_id)
            .await
            .expect("repository reachable")
            .expect("session exists")
    }
}

fn request(workspace_id: &str) -> CreateSessionRequest {
    CreateSessionRequest::builder().workspace_id(workspace_id).build()
}

fn bash_ctx(command: &str) -> ToolUseContext {
    ToolUseContext {
        tool_name: "Bash".to_string(),
        tool_input: json!({ "command": command }),
        id: None,
    }
}

#[tokio::test]
async fn create_session_applies_defaults() {
    let h = harness();

    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    assert_eq!(session.workspace_id, "ws-1");
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.max_turns, DEFAULT_MAX_TURNS);
    assert_eq!(session.turns_used, 0);
    assert_eq!(session.tokens_used, 0);
    assert!(session.skill_names.is_empty());
    assert!(session.resumption_token.is_none());
    assert!(session.sandbox_id.is_none());
    assert!(session.ended_at.is_none());
    assert_eq!(h.stored(&session.id).await, session);
}

#[tokio::test]
async fn max_turns_is_clamped_and_reaches_the_engine() {
    let h = harness();

    let high = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .max_turns(60)
                .build(),
        )
        .await
        .expect("create should succeed");
    let low = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .max_turns(0)
                .build(),
        )
        .await
        .expect("create should succeed");

    assert_eq!(high.max_turns, 50);
    assert_eq!(low.max_turns, 1);

    let stream = h
        .orchestrator
        .send_message(&high.id, "hello")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    assert_eq!(h.engine.requests()[0].max_turns, 50);
}

#[tokio::test]
async fn default_hook_chain_reaches_the_engine() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine.queue_run(vec![raw_assistant_text("ok")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "hello")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    let hooks = Arc::clone(&h.engine.requests()[0].hooks);
    assert!(!hooks.is_empty());
    assert!(hooks.evaluate_before(&bash_ctx("rm -rf /data")).await.is_blocked());
    assert_eq!(hooks.evaluate_before(&bash_ctx("ls -la")).await, HookDecision::Allow);
}

#[tokio::test]
async fn with_hooks_replaces_the_default_chain() {
    let mut h = harness();
    h.orchestrator = h.orchestrator.with_hooks(HookChain::new());
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine.queue_run(vec![raw_assistant_text("ok")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "hello")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    // The replacement chain did not opt back into the destructive blocker.
    let hooks = Arc::clone(&h.engine.requests()[0].hooks);
    assert!(hooks.is_empty());
    assert_eq!(hooks.evaluate_before(&bash_ctx("rm -rf /data")).await, HookDecision::Allow);
}

/// Stub backend that counts allocation attempts.
#[derive(Default)]
struct CountingProvider {
    creates: AtomicU32,
}

#[async_trait]
impl SandboxProvider for CountingProvider {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Noop
    }

    async fn create(&self, session_id: &str) -> Result<String, TychoError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(format!("counted-{session_id}"))
    }

    async fn checkpoint(&self, _provider_id: &str) -> Result<String, TychoError> {
        Ok("cp".to_string())
    }

    async fn restore(&self, _provider_id: &str, _checkpoint_id: &str) -> Result<(), TychoError> {
        Ok(())
    }

    async fn destroy(&self, _provider_id: &str) -> Result<(), TychoError> {
        Ok(())
    }
}

#[tokio::test]
async fn sandbox_is_opt_in() {
    let provider = Arc::new(CountingProvider::default());
    let h = harness_with_provider(Arc::clone(&provider) as Arc<dyn SandboxProvider>);

    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    assert!(session.sandbox_id.is_none());
    assert!(h.sandboxes.get(&session.id).is_none());
    assert_eq!(provider.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn requested_sandbox_is_recorded_on_the_session() {
    let h = harness();

    let session = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .use_sandbox(true)
                .build(),
        )
        .await
        .expect("create should succeed");

    let expected = format!("noop-{}", session.id);
    assert_eq!(session.sandbox_id.as_deref(), Some(expected.as_str()));
    assert_eq!(h.stored(&session.id).await.sandbox_id, session.sandbox_id);
    assert!(h.sandboxes.get(&session.id).is_some());
}

#[tokio::test]
async fn resumption_token_is_captured_and_replayed() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine
        .queue_run(vec![raw_system("init", "abc"), raw_assistant_text("hi")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "first question")
        .await
        .expect("turn should start");
    let events = collect_events(stream).await;

    assert_eq!(
        events[0],
        AgentStreamEvent::System {
            subtype: "init".to_string(),
            session_token: Some("abc".to_string()),
        }
    );
    assert_eq!(events.last(), Some(&AgentStreamEvent::done(2, 0)));

    let after_first = h.stored(&session.id).await;
    assert_eq!(after_first.resumption_token.as_deref(), Some("abc"));
    assert_eq!(after_first.turns_used, 2);

    h.engine.queue_run(vec![raw_assistant_text("again")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "second question")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    let requests = h.engine.requests();
    assert_eq!(requests[0].resume, None);
    assert_eq!(requests[0].credential, "sk-test");
    assert!(requests[0].system_prompt.is_none());
    assert_eq!(requests[1].resume.as_deref(), Some("abc"));
    assert_eq!(requests[1].prompt, "second question");

    // No new token on the second turn, so the stored one survives.
    let after_second = h.stored(&session.id).await;
    assert_eq!(after_second.resumption_token.as_deref(), Some("abc"));
    assert_eq!(after_second.turns_used, 3);
}

#[tokio::test]
async fn counters_accumulate_across_turns() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine
        .queue_run(vec![raw_assistant_with_usage("one", 30)]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "turn one")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    let after_first = h.stored(&session.id).await;
    assert_eq!(after_first.turns_used, 1);
    assert_eq!(after_first.tokens_used, 30);

    h.engine.queue_run(vec![
        raw_assistant_with_usage("two", 12),
        raw_assistant_with_usage("three", 8),
    ]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "turn two")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    let after_second = h.stored(&session.id).await;
    assert_eq!(after_second.turns_used, 3);
    assert_eq!(after_second.tokens_used, 50);
}

#[tokio::test]
async fn fatal_error_moves_session_to_error_state() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine
        .queue_failing_run(vec![raw_assistant_text("partial")], "schema validation exploded");
    let stream = h
        .orchestrator
        .send_message(&session.id, "go")
        .await
        .expect("turn should start");
    let events = collect_events(stream).await;

    assert_eq!(
        events.last(),
        Some(&AgentStreamEvent::error(
            "Engine error: schema validation exploded",
            false
        ))
    );

    let stored = h.stored(&session.id).await;
    assert_eq!(stored.status, SessionStatus::Error);
    assert!(stored.ended_at.is_some());

    let err = h
        .orchestrator
        .send_message(&session.id, "more")
        .await
        .expect_err("error state rejects turns");
    assert!(matches!(err, TychoError::InvalidState(message) if message.contains("is error")));
}

#[tokio::test]
async fn retryable_error_leaves_session_active() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine.queue_failing_run(vec![], "engine overloaded");
    let stream = h
        .orchestrator
        .send_message(&session.id, "go")
        .await
        .expect("turn should start");
    let events = collect_events(stream).await;

    assert_eq!(
        events.last(),
        Some(&AgentStreamEvent::error("Engine error: engine overloaded", true))
    );
    assert_eq!(h.stored(&session.id).await.status, SessionStatus::Active);

    h.engine.queue_run(vec![raw_assistant_text("recovered")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "retry")
        .await
        .expect("active session accepts another turn");
    let events = collect_events(stream).await;
    assert!(matches!(events.last(), Some(AgentStreamEvent::Done { .. })));
}

#[tokio::test]
async fn end_session_tears_down_and_rejects_reuse() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .use_sandbox(true)
                .build(),
        )
        .await
        .expect("create should succeed");

    let ended = h
        .orchestrator
        .end_session(&session.id)
        .await
        .expect("end should succeed");

    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(ended.ended_at.is_some());
    assert_eq!(h.stored(&session.id).await.status, SessionStatus::Ended);
    assert!(h.sandboxes.get(&session.id).is_none());

    let err = h
        .orchestrator
        .end_session(&session.id)
        .await
        .expect_err("ended session rejects another end");
    assert!(matches!(err, TychoError::InvalidState(message) if message.contains("is ended")));
}

#[tokio::test]
async fn checkpoint_requires_a_sandbox() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    let err = h
        .orchestrator
        .create_checkpoint(&session.id, None)
        .await
        .expect_err("no sandbox means no checkpoint");
    assert!(
        matches!(err, TychoError::InvalidState(message) if message.contains("no active sandbox"))
    );
}

#[tokio::test]
async fn checkpoint_then_restore_roundtrip() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .use_sandbox(true)
                .build(),
        )
        .await
        .expect("create should succeed");

    let checkpoint = h
        .orchestrator
        .create_checkpoint(&session.id, Some("before-migration".to_string()))
        .await
        .expect("checkpoint should succeed");

    assert_eq!(checkpoint.session_id, session.id);
    assert_eq!(checkpoint.label.as_deref(), Some("before-migration"));
    assert!(checkpoint.provider_checkpoint_id.starts_with("noop-checkpoint-"));

    h.orchestrator
        .restore_checkpoint(&session.id, &checkpoint)
        .await
        .expect("restore should succeed");
}

#[tokio::test]
async fn restore_rejects_a_foreign_checkpoint() {
    let h = harness();
    let sandboxed = CreateSessionRequest::builder()
        .workspace_id("ws-1")
        .use_sandbox(true)
        .build();
    let first = h
        .orchestrator
        .create_session(sandboxed.clone())
        .await
        .expect("create should succeed");
    let second = h
        .orchestrator
        .create_session(sandboxed)
        .await
        .expect("create should succeed");

    let checkpoint = h
        .orchestrator
        .create_checkpoint(&first.id, None)
        .await
        .expect("checkpoint should succeed");

    let err = h
        .orchestrator
        .restore_checkpoint(&second.id, &checkpoint)
        .await
        .expect_err("foreign checkpoint rejected");
    assert!(matches!(err, TychoError::CheckpointNotFound(id) if id == checkpoint.id));
}

#[tokio::test]
async fn skills_compose_the_system_prompt_with_context() {
    let h = harness();
    h.add_skill(
        "triage",
        "# Triage\n\nHandle workspace {{WORKSPACE_ID}} tickets.\nRegion: {{REGION}}",
    );
    let session = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .skill_names(vec!["triage".to_string()])
                .build(),
        )
        .await
        .expect("create should succeed");

    h.engine.queue_run(vec![raw_assistant_text("ok")]);
    let stream = h
        .orchestrator
        .send_message(&session.id, "help")
        .await
        .expect("turn should start");
    collect_events(stream).await;

    let requests = h.engine.requests();
    let system_prompt = requests[0].system_prompt.as_deref().expect("composed prompt");
    assert!(system_prompt.contains("Handle workspace ws-1 tickets."));
    assert!(system_prompt.contains("Region: [not available]"));
}

#[tokio::test]
async fn missing_skill_fails_before_the_engine_opens() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(
            CreateSessionRequest::builder()
                .workspace_id("ws-1")
                .skill_names(vec!["ghost".to_string()])
                .build(),
        )
        .await
        .expect("create should succeed");

    let err = h
        .orchestrator
        .send_message(&session.id, "help")
        .await
        .expect_err("unknown skill fails the turn");

    assert!(matches!(err, TychoError::SkillNotFound(name) if name == "ghost"));
    assert!(h.engine.requests().is_empty());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = harness();

    let err = h
        .orchestrator
        .send_message("ghost-session", "hello")
        .await
        .expect_err("unknown session");
    assert!(matches!(err, TychoError::SessionNotFound(id) if id == "ghost-session"));

    let err = h
        .orchestrator
        .get_session("ghost-session")
        .await
        .expect_err("unknown session");
    assert!(matches!(err, TychoError::SessionNotFound(_)));
}

#[derive(Debug, PartialEq, Deserialize)]
struct Reply {
    status: String,
    count: u32,
}

#[tokio::test]
async fn structured_turn_updates_the_session_record() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    h.engine.queue_run(vec![
        raw_system("init", "tok-1"),
        raw_assistant_with_usage("```json\n{\"status\":\"ok\",\"count\":2}\n```", 25),
    ]);

    let output = h
        .orchestrator
        .send_structured::<Reply>(
            &session.id,
            "summarize",
            json!({"type": "object", "properties": {"status": {}, "count": {}}}),
        )
        .await
        .expect("structured turn should succeed");

    assert_eq!(
        output.value,
        Reply {
            status: "ok".to_string(),
            count: 2
        }
    );
    assert_eq!(output.attempts, 1);

    let stored = h.stored(&session.id).await;
    assert_eq!(stored.turns_used, 2);
    assert_eq!(stored.tokens_used, 25);
    assert_eq!(stored.resumption_token.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn failed_structured_turn_leaves_the_record_untouched() {
    let h = harness();
    let session = h
        .orchestrator
        .create_session(request("ws-1"))
        .await
        .expect("create should succeed");

    // No queued runs: every attempt replays an empty stream with no JSON.
    let err = h
        .orchestrator
        .send_structured::<Reply>(&session.id, "summarize", json!({"type": "object"}))
        .await
        .expect_err("no JSON in any attempt");

    assert!(matches!(err, TychoError::StructuredOutput { attempts: 3, .. }));
    assert_eq!(h.engine.requests().len(), 3);

    let stored = h.stored(&session.id).await;
    assert_eq!(stored.turns_used, 0);
    assert_eq!(stored.tokens_used, 0);
}
