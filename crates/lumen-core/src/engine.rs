//! Generation engine capability

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;

use crate::{GenerationRequest, Result};

/// Lazily produced text chunks of one generation call.
///
/// The stream is finite and cannot be restarted. Dropping it must terminate
/// the underlying generation, not merely stop reading from it, so that the
/// accelerator is released as soon as the consumer decides to stop.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Trait for vision-conditioned text generation engines
///
/// The engine is treated as a black box: it receives the prompt, sampling
/// parameters and a path to an already size-limited image, and yields text.
/// Out-of-memory conditions may surface either when the call starts or as
/// an error item mid-stream.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Start generating text for `request` conditioned on `image`
    async fn generate(&self, request: &GenerationRequest, image: &Path) -> Result<ChunkStream>;

    /// Get the model ID being used
    fn model_id(&self) -> &str;
}
