//! Common types used across the Lumen pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{DegradationConfig, Error, Result};

/// Scores for the evaluated dimensions, each nominally in `[0, 10]`.
///
/// Values are never clamped: an out-of-range score is evidence of a parse
/// problem and is kept as such.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AestheticScore {
    pub composition: f64,
    pub focal_length: f64,
    pub contrast_exposure_brightness: f64,
    pub overall: f64,
}

impl AestheticScore {
    /// Neutral score used by the fallback record
    pub const NEUTRAL: f64 = 5.0;

    pub fn uniform(value: f64) -> Self {
        Self {
            composition: value,
            focal_length: value,
            contrast_exposure_brightness: value,
            overall: value,
        }
    }
}

/// Structured result of evaluating one image.
///
/// Every narrative field is always populated, possibly with an empty string
/// or a placeholder, so consumers never branch on optionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(rename = "composition_analysis")]
    pub composition_text: String,
    #[serde(rename = "focal_length_analysis")]
    pub focal_length_text: String,
    #[serde(rename = "contrast_exposure_brightness_analysis")]
    pub contrast_text: String,
    #[serde(rename = "overall_evaluation")]
    pub overall_evaluation_text: String,
    #[serde(rename = "suggestions")]
    pub suggestions_text: String,
    pub scores: AestheticScore,
    /// False only for the fallback record produced when no report structure
    /// could be recognised at all.
    pub parsed: bool,
}

impl AnalysisRecord {
    pub const COMPOSITION_UNAVAILABLE: &'static str = "构图分析暂不可用";
    pub const FOCAL_LENGTH_UNAVAILABLE: &'static str = "焦段分析暂不可用";
    pub const CONTRAST_UNAVAILABLE: &'static str = "对比度&曝光度&亮度分析暂不可用";
    pub const EVALUATION_UNAVAILABLE: &'static str = "整体评价暂不可用";
    pub const SUGGESTIONS_UNAVAILABLE: &'static str = "建议暂不可用";

    /// The fixed record returned when parsing fails outright: neutral scores
    /// so that batch averages are not dragged towards zero.
    pub fn fallback() -> Self {
        Self {
            composition_text: Self::COMPOSITION_UNAVAILABLE.to_string(),
            focal_length_text: Self::FOCAL_LENGTH_UNAVAILABLE.to_string(),
            contrast_text: Self::CONTRAST_UNAVAILABLE.to_string(),
            overall_evaluation_text: Self::EVALUATION_UNAVAILABLE.to_string(),
            suggestions_text: Self::SUGGESTIONS_UNAVAILABLE.to_string(),
            scores: AestheticScore::uniform(AestheticScore::NEUTRAL),
            parsed: false,
        }
    }

    pub fn is_fallback(&self) -> bool {
        !self.parsed
    }
}

/// Parameters of one generation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub image: PathBuf,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on the longer image side handed to the engine
    pub max_image_dimension: u32,
    /// Number of identical consecutive chunks that counts as a stuck loop
    pub repeat_threshold: usize,
}

impl GenerationRequest {
    pub const DEFAULT_MAX_TOKENS: u32 = 2048;
    pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 1024;
    pub const DEFAULT_REPEAT_THRESHOLD: usize = 3;

    /// Create a request with default budgets
    pub fn new(image: impl Into<PathBuf>, prompt: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            prompt: prompt.into(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            max_image_dimension: Self::DEFAULT_MAX_IMAGE_DIMENSION,
            repeat_threshold: Self::DEFAULT_REPEAT_THRESHOLD,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_image_dimension(mut self, max_image_dimension: u32) -> Self {
        self.max_image_dimension = max_image_dimension;
        self
    }

    pub fn with_repeat_threshold(mut self, repeat_threshold: usize) -> Self {
        self.repeat_threshold = repeat_threshold;
        self
    }

    /// Check the numeric invariants of a request
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("max_tokens must be positive".to_string()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::InvalidInput(format!(
                "temperature must be a finite value >= 0, got {}",
                self.temperature
            )));
        }
        if self.max_image_dimension == 0 {
            return Err(Error::InvalidInput(
                "max_image_dimension must be positive".to_string(),
            ));
        }
        if self.repeat_threshold < 2 {
            return Err(Error::InvalidInput(format!(
                "repeat_threshold must be at least 2, got {}",
                self.repeat_threshold
            )));
        }
        Ok(())
    }

    /// Derive the smaller request used for the single retry after resource
    /// exhaustion. The original is left untouched.
    pub fn degraded(&self, config: &DegradationConfig) -> Self {
        Self {
            max_image_dimension: self.max_image_dimension / 2,
            max_tokens: self.max_tokens.min(config.retry_max_tokens),
            ..self.clone()
        }
    }
}

/// Per-chunk decision of the stream guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    Stop,
}

/// Terminal outcome of one evaluation's generation phase
#[derive(Debug)]
pub enum Outcome {
    /// The engine finished on its own
    Completed,
    /// The stream guard cut generation short
    StoppedEarly,
    /// The first attempt exhausted resources and the reduced retry produced text
    Degraded,
    /// Generation failed; carries the original cause
    Failed(Error),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "ok",
            Outcome::StoppedEarly => "stopped_early",
            Outcome::Degraded => "degraded_ok",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Failed(cause) => write!(f, "failed: {}", cause),
            other => f.write_str(other.label()),
        }
    }
}

/// Text and outcome produced by running a request through the controller
#[derive(Debug)]
pub struct GenerationRun {
    /// Accumulated text; empty when the outcome is `Failed`
    pub text: String,
    pub outcome: Outcome,
    /// The last request handed to the engine
    pub request: GenerationRequest,
    /// Number of engine invocations made
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("photo.jpg", "analyse")
    }

    #[test]
    fn test_fallback_record_is_neutral() {
        let record = AnalysisRecord::fallback();
        assert_eq!(record.scores, AestheticScore::uniform(5.0));
        assert!(record.is_fallback());
        assert_eq!(record.suggestions_text, "建议暂不可用");
    }

    #[test]
    fn test_default_request_is_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(request().with_max_tokens(0).validate().is_err());
        assert!(request().with_temperature(-0.1).validate().is_err());
        assert!(request().with_temperature(f32::NAN).validate().is_err());
        assert!(request().with_max_image_dimension(0).validate().is_err());
        assert!(request().with_repeat_threshold(1).validate().is_err());
    }

    #[test]
    fn test_degraded_halves_dimension_and_caps_tokens() {
        let config = DegradationConfig::default();
        let original = request().with_max_image_dimension(1024).with_max_tokens(2048);
        let retry = original.degraded(&config);

        assert_eq!(retry.max_image_dimension, 512);
        assert_eq!(retry.max_tokens, 256);
        assert_eq!(retry.prompt, original.prompt);
        assert_eq!(original.max_image_dimension, 1024);
    }

    #[test]
    fn test_degraded_keeps_smaller_token_budget() {
        let config = DegradationConfig::default();
        let retry = request().with_max_tokens(100).degraded(&config);
        assert_eq!(retry.max_tokens, 100);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Completed.label(), "ok");
        assert_eq!(Outcome::Degraded.to_string(), "degraded_ok");
        let failed = Outcome::Failed(Error::Engine("boom".to_string()));
        assert!(!failed.is_success());
        assert_eq!(failed.to_string(), "failed: Generation engine error: boom");
    }

    #[test]
    fn test_record_serializes_nested_scores() {
        let value = serde_json::to_value(AnalysisRecord::fallback()).unwrap();
        assert_eq!(value["scores"]["overall"], 5.0);
        assert_eq!(value["composition_analysis"], "构图分析暂不可用");
        assert_eq!(value["parsed"], false);
    }
}
