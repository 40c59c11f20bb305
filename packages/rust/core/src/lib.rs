//! Onboarding orchestration and pipeline wiring for brandpipe.
//!
//! This crate turns crawl-completed events into brand guides, content plans,
//! and BFS-scored drafts, and wires the job store, workers, and orchestrator
//! into one in-process [`Pipeline`].

pub mod completion;
pub mod orchestrator;
pub mod pipeline;
mod prompts;

pub use completion::{CompletionKind, CompletionService, OpenRouterClient};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, run_verification};
