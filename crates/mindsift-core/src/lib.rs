/// Core library for the Mindsift recursive insight engine.
///
/// This crate contains the full processing core: deterministic Tier 0
/// signal extraction, LLM-based insight extraction and critique, pattern
/// clustering and synthesis, the case state machine with its durable work
/// queue, and the SQLite storage layer that ties them together.
pub mod cache;
pub mod config;
pub mod critique;
pub mod entity;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod signals;
pub mod storage;
pub mod synth;

pub use error::*;

/// Returns the version of the mindsift-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
