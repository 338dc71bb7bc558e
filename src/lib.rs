//! Tycho — agent-engine session orchestration
//!
//! Drives a third-party AI agent execution engine through multi-turn
//! conversations. The engine's heterogeneous raw output is normalized into a
//! closed canonical event protocol at one boundary; on top of that sit a
//! structured-output enforcement loop, an ordered tool-use hook chain, a
//! checkpoint-able sandbox lifecycle manager, and the session orchestrator
//! tying them together.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tycho::prelude::*;
//!
//! # async fn example(engine: Arc<dyn AgentEngine>) -> tycho::error::Result<()> {
//! let config = TychoConfig::from_env();
//! let orchestrator = SessionOrchestrator::new(
//!     engine,
//!     Arc::new(MemorySessionRepository::new()),
//!     Arc::new(StaticCredentialResolver::from_config(&config)),
//!     Arc::new(SkillStore::new("skills")),
//!     Arc::new(SandboxManager::from_config(&config)?),
//! );
//!
//! let session = orchestrator
//!     .create_session(CreateSessionRequest::builder().workspace_id("ws-1").build())
//!     .await?;
//!
//! let mut events = orchestrator.send_message(&session.id, "tidy up my links").await?;
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod prelude;
pub mod runner;
pub mod sandbox;
pub mod session;
pub mod skills;
pub mod structured;
pub mod types;
