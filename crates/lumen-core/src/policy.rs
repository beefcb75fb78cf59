//! Tunable policies for stream guarding and resource degradation

use serde::{Deserialize, Serialize};

/// Thresholds and phrase lists used by the stream guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Size of the trailing window checked for verbatim loop-back
    pub window_chars: usize,
    /// Accumulated length above which refusal phrases are checked
    pub refusal_min_chars: usize,
    /// Trimmed chunk length a repeated chunk must exceed to count as a loop
    pub min_repeat_chunk_chars: usize,
    /// Boilerplate phrases that mark a non-answer (asking for an upload, etc.)
    pub refusal_phrases: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window_chars: 50,
            refusal_min_chars: 20,
            min_repeat_chunk_chars: 3,
            refusal_phrases: vec![
                "请上传".to_string(),
                "上传照片".to_string(),
                "期待您的".to_string(),
            ],
        }
    }
}

impl GuardConfig {
    /// Replace the refusal denylist, e.g. for another locale
    pub fn with_refusal_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refusal_phrases = phrases.into_iter().map(Into::into).collect();
        self
    }
}

/// When and how a generation request is shrunk after resource exhaustion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// At or below this image dimension no retry is attempted
    pub min_image_dimension: u32,
    /// Token budget ceiling applied to the retry
    pub retry_max_tokens: u32,
    /// Case-insensitive substrings identifying exhaustion errors
    pub exhaustion_signatures: Vec<String>,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            min_image_dimension: 256,
            retry_max_tokens: 256,
            exhaustion_signatures: vec![
                "memory".to_string(),
                "insufficient".to_string(),
                "kIOGPUCommandBufferCallbackErrorOutOfMemory".to_string(),
            ],
        }
    }
}
