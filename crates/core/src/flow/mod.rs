//! # Turn & Finalization Flow
//!
//! Everything between a wire request and persisted state.
//!
//! ## Turn Flow
//!
//! ```text
//! ChatRequest → Orchestrator → stage agent → merge + persist → ChatResponse
//!                     └─ stage 9 → CompletionPipeline → events → narrative job
//! ```

pub mod completion;
pub mod events;
pub mod narrative_job;
pub mod router;
pub mod schedule;
pub mod wire;

pub use completion::{CompletionConfig, CompletionPipeline, CompletionSummary};
pub use events::{CompletionEvent, CompletionEventKind, EventStatus};
pub use narrative_job::{spawn_narrative_job, NarrativeJobConfig, NarrativeJobReport};
pub use router::Orchestrator;
pub use schedule::{schedule_for_week, ScheduledWindow};
pub use wire::{ChatRequest, ChatResponse, ConnectionStatus, TranscriptMessage};
