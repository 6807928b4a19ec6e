//! Pipeline orchestration: sequences the capability clients into the
//! audio-in and text-in request pipelines, with media-cache write-through
//! and an optional render worker pool.

pub mod cache;
pub mod orchestrator;
pub mod queue;

pub use orchestrator::{Pipeline, PipelineBuilder, StageTimeouts};
