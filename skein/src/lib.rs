#![cfg_attr(docsrs, feature(doc_cfg))]
//! Skein is a deterministic, event-emitting execution core for LLM agents.
//!
//! The engine drives a multi-turn dialog loop: it asks a
//! [`ModelProvider`](provider::ModelProvider) for a completion, dispatches
//! the requested tool calls (with schema validation, human-in-the-loop
//! approval, and clarification interruptions), performs agent-to-agent
//! handoffs, enforces input/output guardrails, persists conversation
//! state through a pluggable [`MemoryStore`](memory::MemoryStore), and
//! surfaces a live trace of every step as
//! [`TraceEvent`](events::TraceEvent)s.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use skein::prelude::*;
//!
//! let registry = AgentRegistry::new().with_agent(
//!     Agent::new("assistant")
//!         .instructions("You are a helpful assistant.")
//!         .model("gpt-4o")
//!         .tool(calculator),
//! );
//! let config = RunConfig::new(registry, provider);
//!
//! let result = Runner::run(RunState::new("assistant", "What is 15 + 27?"), &config).await;
//! match result.outcome {
//!     RunOutcome::Completed { output } => println!("{output}"),
//!     RunOutcome::Interrupted { interruptions } => { /* ask the user, resume */ }
//!     RunOutcome::Error { error } => eprintln!("{error}"),
//! }
//! ```
//!
//! Interruption is a first-class outcome, not a blocking wait: the engine
//! returns control to the caller, who records decisions on the state
//! ([`RunState::with_approval`](state::RunState::with_approval),
//! [`RunState::with_clarification`](state::RunState::with_clarification))
//! and re-enters [`Runner::run`](runner::Runner::run). The engine detects
//! the pending tool calls and continues without a new model round.

// Core types
pub mod error;
pub mod events;
pub mod ids;
pub mod message;
pub mod state;
pub mod usage;

// Agents and tools
pub mod agent;
pub mod guardrail;
pub mod tool;

// Model backends
pub mod provider;
pub mod stream;

// Persistence
pub mod approval;
pub mod memory;

// The engine
pub mod runner;

pub mod prelude;

pub use error::{Error, Result};
pub use runner::{RunConfig, Runner};
pub use state::{RunOutcome, RunResult, RunState};
