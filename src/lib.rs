//! manim-heal library crate
//!
//! Self-healing generation of Manim scenes: a staged LLM pipeline produces a
//! candidate, a sandboxed renderer verifies it, and a bounded retry loop feeds
//! enriched render errors back into the next attempt.

pub mod config;
pub mod heal;
pub mod job;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod store;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use heal::enrich::{enrich_error, friendly_error, FriendlyError};
pub use heal::{
    JobReport, SelfHealingPipeline, DEFAULT_MAX_RETRIES, TTS_FALLBACK_MAX_RETRIES,
};
pub use job::{GenerationOptions, GenerationResult, JobStatus, JobUpdate};
pub use pipeline::create_safe_fallback_scene;
