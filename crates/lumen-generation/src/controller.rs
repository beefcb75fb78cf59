//! Resource-aware generation driver with a single degraded retry

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use lumen_core::{
    DegradationConfig, Error, GenerationEngine, GenerationRequest, GenerationRun, GuardConfig,
    ImagePreprocessor, NoopReclaimer, Outcome, ResourceReclaimer, Verdict,
};

use crate::guard::StreamGuard;

/// Callback receiving every chunk the guard accepts, e.g. to echo the
/// analysis to a terminal as it is generated
pub type ChunkObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Text produced by one attempt and whether the guard cut it short
#[derive(Debug)]
struct AttemptOutput {
    text: String,
    stopped_early: bool,
}

/// Runs generation requests end-to-end under a `StreamGuard`.
///
/// If the engine reports resource exhaustion, the request is shrunk (half
/// the image dimension, capped token budget) and tried exactly once more.
/// Any other engine failure is reported as `Failed` immediately.
pub struct DegradationController<E, P, R = NoopReclaimer>
where
    E: GenerationEngine,
    P: ImagePreprocessor,
    R: ResourceReclaimer,
{
    engine: E,
    preprocessor: P,
    reclaimer: R,
    guard_config: GuardConfig,
    config: DegradationConfig,
    observer: Option<ChunkObserver>,
}

impl<E, P> DegradationController<E, P, NoopReclaimer>
where
    E: GenerationEngine,
    P: ImagePreprocessor,
{
    /// Create a controller with default policies and no reclamation hook
    pub fn new(engine: E, preprocessor: P) -> Self {
        Self {
            engine,
            preprocessor,
            reclaimer: NoopReclaimer,
            guard_config: GuardConfig::default(),
            config: DegradationConfig::default(),
            observer: None,
        }
    }
}

impl<E, P, R> DegradationController<E, P, R>
where
    E: GenerationEngine,
    P: ImagePreprocessor,
    R: ResourceReclaimer,
{
    /// Install a hook that frees cached accelerator memory before the retry
    pub fn with_reclaimer<R2: ResourceReclaimer>(self, reclaimer: R2) -> DegradationController<E, P, R2> {
        DegradationController {
            engine: self.engine,
            preprocessor: self.preprocessor,
            reclaimer,
            guard_config: self.guard_config,
            config: self.config,
            observer: self.observer,
        }
    }

    pub fn with_guard_config(mut self, guard_config: GuardConfig) -> Self {
        self.guard_config = guard_config;
        self
    }

    pub fn with_degradation_config(mut self, config: DegradationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_chunk_observer(mut self, observer: ChunkObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run `request`, retrying once with a smaller request on exhaustion
    pub async fn run(&self, request: &GenerationRequest) -> GenerationRun {
        if let Err(e) = request.validate() {
            return Self::failed(request.clone(), 0, e);
        }

        let error = match self.attempt(request).await {
            Ok(output) => return Self::finished(request.clone(), 1, output, false),
            Err(error) => error,
        };

        if !error.is_resource_exhaustion(&self.config.exhaustion_signatures) {
            warn!(image = %request.image.display(), "generation failed: {}", error);
            return Self::failed(request.clone(), 1, error);
        }

        if request.max_image_dimension <= self.config.min_image_dimension {
            warn!(
                image = %request.image.display(),
                max_image_dimension = request.max_image_dimension,
                floor = self.config.min_image_dimension,
                "resource exhausted at minimum image size, giving up: {}",
                error
            );
            return Self::failed(request.clone(), 1, error);
        }

        let retry = request.degraded(&self.config);
        info!(
            image = %request.image.display(),
            from = request.max_image_dimension,
            to = retry.max_image_dimension,
            max_tokens = retry.max_tokens,
            "resource exhausted, retrying with reduced input: {}",
            error
        );
        self.reclaimer.clear_resources();

        match self.attempt(&retry).await {
            Ok(output) => Self::finished(retry, 2, output, true),
            Err(error) => {
                warn!(image = %retry.image.display(), "degraded retry failed: {}", error);
                Self::failed(retry, 2, error)
            }
        }
    }

    /// One engine invocation under a fresh guard. The prepared image, and any
    /// temporary file behind it, lives only for the duration of the attempt.
    async fn attempt(&self, request: &GenerationRequest) -> Result<AttemptOutput, Error> {
        let image = self
            .preprocessor
            .prepare(&request.image, request.max_image_dimension)
            .await?;

        debug!(
            image = %image.path().display(),
            model = self.engine.model_id(),
            max_tokens = request.max_tokens,
            "starting generation"
        );

        let mut stream = self.engine.generate(request, image.path()).await?;
        let mut guard = StreamGuard::new(&self.guard_config, request.repeat_threshold);

        let mut stopped_early = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if guard.observe(&chunk) == Verdict::Stop {
                stopped_early = true;
                break;
            }
            if let Some(observer) = &self.observer {
                observer(chunk.as_str());
            }
        }
        // Dropping the stream cancels the engine call before the image is released.
        drop(stream);

        Ok(AttemptOutput {
            text: guard.into_text(),
            stopped_early,
        })
    }

    fn finished(
        request: GenerationRequest,
        attempts: u32,
        output: AttemptOutput,
        degraded: bool,
    ) -> GenerationRun {
        let outcome = match (degraded, output.stopped_early) {
            (true, _) => Outcome::Degraded,
            (false, true) => Outcome::StoppedEarly,
            (false, false) => Outcome::Completed,
        };
        GenerationRun {
            text: output.text,
            outcome,
            request,
            attempts,
        }
    }

    fn failed(request: GenerationRequest, attempts: u32, error: Error) -> GenerationRun {
        GenerationRun {
            text: String::new(),
            outcome: Outcome::Failed(error),
            request,
            attempts,
        }
    }
}
