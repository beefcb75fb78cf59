//! Per-stream degeneration detector

use std::collections::VecDeque;

use lumen_core::{GuardConfig, Verdict};
use tracing::debug;

/// Why a stream was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The trailing window already occurred earlier in the text
    LongSpanRepetition,
    /// The last `repeat_threshold` chunks were identical
    ShortSpanSaturation,
    /// The text contains a refusal or ask-for-input phrase
    RefusalPhrase,
}

/// Mutable state of one generation attempt. Never shared between attempts.
///
/// `text[..committed]` is what the stop rules see. Whitespace-only chunks
/// sit after it until the next accepted chunk commits them.
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    committed: usize,
    committed_chars: usize,
    /// Byte offset up to which the committed text has been searched for
    /// refusal phrases
    refusal_scanned: usize,
    recent: VecDeque<String>,
    stopped: Option<StopReason>,
}

/// Watches a chunk stream and decides after every chunk whether generation
/// should continue.
///
/// Three independent heuristics are checked in order, each against the text
/// committed before the current chunk:
///
/// 1. verbatim loop-back of the last `window_chars` characters,
/// 2. `repeat_threshold` byte-identical chunks in a row,
/// 3. boilerplate refusal phrases from the configured denylist.
///
/// Whitespace-only chunks are invisible to all three rules. They are held
/// back and committed together with the next accepted chunk, so line
/// structure still reaches [`StreamGuard::text`]. The chunk that trips a
/// rule is withheld from the text, and once stopped the guard answers
/// `Stop` to everything without further side effects.
///
/// The refusal scan only revisits the tail that a new phrase could end in.
/// The loop-back search is linear in the committed text, which the token
/// budget keeps small.
#[derive(Debug)]
pub struct StreamGuard<'a> {
    config: &'a GuardConfig,
    repeat_threshold: usize,
    longest_phrase: usize,
    state: StreamState,
}

impl<'a> StreamGuard<'a> {
    /// Create a guard for one attempt. `repeat_threshold` is clamped to at
    /// least 2, since a single chunk is always "identical to itself".
    pub fn new(config: &'a GuardConfig, repeat_threshold: usize) -> Self {
        let longest_phrase = config
            .refusal_phrases
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0);

        Self {
            config,
            repeat_threshold: repeat_threshold.max(2),
            longest_phrase,
            state: StreamState::default(),
        }
    }

    /// Record `chunk` and decide whether generation may continue
    pub fn observe(&mut self, chunk: &str) -> Verdict {
        if self.state.stopped.is_some() {
            return Verdict::Stop;
        }

        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            self.state.text.push_str(chunk);
            return Verdict::Continue;
        }

        self.state.recent.push_back(chunk.to_string());
        while self.state.recent.len() > self.repeat_threshold {
            self.state.recent.pop_front();
        }

        if let Some(reason) = self.check(trimmed) {
            debug!(
                ?reason,
                accumulated_chars = self.state.committed_chars,
                "stream guard stopping generation"
            );
            self.state.stopped = Some(reason);
            return Verdict::Stop;
        }

        if self.state.committed_chars > self.config.refusal_min_chars {
            self.state.refusal_scanned = self.state.committed;
        }
        self.commit(chunk);
        Verdict::Continue
    }

    fn committed_text(&self) -> &str {
        &self.state.text[..self.state.committed]
    }

    fn check(&self, trimmed_chunk: &str) -> Option<StopReason> {
        if self.repeats_trailing_window() {
            return Some(StopReason::LongSpanRepetition);
        }

        if self.recent_chunks_saturated()
            && trimmed_chunk.chars().count() > self.config.min_repeat_chunk_chars
        {
            return Some(StopReason::ShortSpanSaturation);
        }

        if self.state.committed_chars > self.config.refusal_min_chars && self.contains_refusal() {
            return Some(StopReason::RefusalPhrase);
        }

        None
    }

    fn repeats_trailing_window(&self) -> bool {
        let window = self.config.window_chars;
        if window == 0 || self.state.committed_chars <= window {
            return false;
        }

        let text = self.committed_text();
        let split = match text.char_indices().rev().nth(window - 1) {
            Some((idx, _)) => idx,
            None => return false,
        };
        let (head, tail) = text.split_at(split);
        head.contains(tail)
    }

    fn recent_chunks_saturated(&self) -> bool {
        let recent = &self.state.recent;
        recent.len() >= self.repeat_threshold
            && recent.iter().all(|chunk| chunk == &recent[0])
    }

    /// Search the committed text for a refusal phrase, skipping the prefix
    /// that earlier scans already cleared
    fn contains_refusal(&self) -> bool {
        let text = self.committed_text();
        let mut start = self.state.refusal_scanned.saturating_sub(self.longest_phrase);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let region = &text[start..];

        self.config
            .refusal_phrases
            .iter()
            .any(|phrase| !phrase.is_empty() && region.contains(phrase.as_str()))
    }

    fn commit(&mut self, chunk: &str) {
        let pending_chars = self.state.text[self.state.committed..].chars().count();
        self.state.text.push_str(chunk);
        self.state.committed = self.state.text.len();
        self.state.committed_chars += pending_chars + chunk.chars().count();
    }

    /// Text accepted so far, including held-back whitespace
    pub fn text(&self) -> &str {
        &self.state.text
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.state.stopped
    }

    /// Consume the guard, keeping only the accumulated text
    pub fn into_text(self) -> String {
        self.state.text
    }
}
