//! Guarded streaming generation for Lumen
//!
//! This crate drives a `GenerationEngine` chunk by chunk under a
//! `StreamGuard`, retries once with a smaller request when the engine runs
//! out of resources, and ships an OpenAI-compatible HTTP engine.

mod client;
mod config;
mod controller;
mod guard;


pub use client::OpenAiCompatEngine;
pub use config::EngineConfig;
pub use controller::{ChunkObserver, DegradationController};
pub use guard::{StopReason, StreamGuard};

// Re-export core types for convenience
pub use lumen_core::{
    DegradationConfig, Error, GenerationEngine, GenerationRequest, GenerationRun, GuardConfig,
    Outcome, Result, Verdict,
};
