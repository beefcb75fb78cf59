//! Core traits and types for Lumen
//!
//! This crate defines the shared vocabulary of the evaluation pipeline: the
//! analysis record and its scores, generation requests and outcomes, the
//! guard and degradation policies, and the capability traits through which
//! the generation engine, image preprocessing and resource reclamation are
//! injected.

pub mod engine;
pub mod error;
pub mod policy;
pub mod preprocess;
pub mod types;

pub use engine::{ChunkStream, GenerationEngine};
pub use error::{Error, Result};
pub use policy::{DegradationConfig, GuardConfig};
pub use preprocess::{
    ImagePreprocessor, NoopReclaimer, PassthroughPreprocessor, PreparedImage, ResourceReclaimer,
};
pub use types::*;
