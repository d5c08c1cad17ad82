//! # Groundwork Core
//!
//! The "Brain" of the Groundwork system - stage orchestration, shared idea
//! state, and the finalization pipeline that turns a finished intake
//! conversation into real project artifacts.
//!
//! ## Architecture
//!
//! - `agents/` - Typed LLM agents (one per intake stage, sprint planner, narrative writer)
//! - `models` - Centralized LLM provider configuration
//! - `state/` - SQLite persistence: transcript, idea state, projects, tasks, documents
//! - `flow/` - Turn routing, stage chaining, completion pipeline, background narrative job
//!
//! ## Usage
//!
//! ```rust,ignore
//! use groundwork_core::flow::{Orchestrator, ChatRequest};
//!
//! let orchestrator = Orchestrator::new(db, roster, planner, writer);
//! orchestrator.handle_turn(request, &response_tx).await;
//! ```

pub mod agents;
pub mod flow;
pub mod models;
pub mod state;
