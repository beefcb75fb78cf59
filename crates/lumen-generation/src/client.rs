//! OpenAI-compatible streaming vision engine client

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

use lumen_core::{ChunkStream, Error, GenerationEngine, GenerationRequest, Result};

use crate::config::EngineConfig;

/// Client for servers exposing `/chat/completions` with image inputs
/// (mlx-vlm, llama.cpp, vLLM and friends).
pub struct OpenAiCompatEngine {
    config: EngineConfig,
    completions_url: url::Url,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChunkData {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}

/// One decoded server-sent event
#[derive(Debug, PartialEq)]
enum SseEvent {
    Text(String),
    Done,
    Failure(String),
}

/// Incremental decoder for `data: {...}` lines split across network reads
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = Self::decode_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body ends without a final newline
    fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&String::from_utf8_lossy(&rest))
    }

    fn decode_line(line: &str) -> Option<SseEvent> {
        let payload = line.trim().strip_prefix("data:")?.trim();

        if payload.is_empty() {
            return None;
        }
        if payload == "[DONE]" {
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<ChunkData>(payload) {
            Ok(data) => {
                if let Some(error) = data.error {
                    return Some(SseEvent::Failure(error.message));
                }
                let text: String = data
                    .choices
                    .into_iter()
                    .filter_map(|choice| choice.delta.and_then(|d| d.content))
                    .collect();
                (!text.is_empty()).then_some(SseEvent::Text(text))
            }
            Err(e) => {
                warn!("Failed to parse stream line: {} - Error: {}", payload, e);
                None
            }
        }
    }
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl OpenAiCompatEngine {
    /// Create a new engine client from configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        let completions_url = config.completions_url()?;

        // Streams may run for minutes; only connecting and each read are bounded.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .read_timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            config,
            completions_url,
            client,
        })
    }

    /// Create a new engine client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = EngineConfig::from_env()?;
        Self::new(config)
    }

    /// Set the model to use for generation
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Read the image and wrap it as a `data:` URL
    async fn image_data_url(image: &Path) -> Result<String> {
        let mime = match image
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            Some("bmp") => "image/bmp",
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Unsupported image format for engine input: {}",
                    image.display()
                )));
            }
        };

        let bytes = tokio::fs::read(image).await?;
        Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
    }

    fn into_chunks(response: reqwest::Response) -> ChunkStream {
        let state = StreamState {
            body: response
                .bytes_stream()
                .map(|item| {
                    item.map(|bytes| bytes.to_vec())
                        .map_err(|e| Error::Network(e.to_string()))
                })
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.body.next().await {
                    Some(Ok(bytes)) => {
                        for event in state.decoder.push(&bytes) {
                            if state.accept(event) {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.pending.push_back(Err(e));
                        state.finished = true;
                    }
                    None => {
                        if let Some(event) = state.decoder.finish() {
                            state.accept(event);
                        }
                        state.finished = true;
                    }
                }
            }
        })
        .boxed()
    }
}

impl StreamState {
    /// Queue the effect of one event; returns true once the stream is over
    fn accept(&mut self, event: SseEvent) -> bool {
        match event {
            SseEvent::Text(text) => self.pending.push_back(Ok(text)),
            SseEvent::Done => self.finished = true,
            SseEvent::Failure(message) => {
                self.pending.push_back(Err(Error::Engine(message)));
                self.finished = true;
            }
        }
        self.finished
    }
}

#[async_trait]
impl GenerationEngine for OpenAiCompatEngine {
    async fn generate(&self, request: &GenerationRequest, image: &Path) -> Result<ChunkStream> {
        let image_url = Self::image_data_url(image).await?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                    ContentPart::Text {
                        text: request.prompt.clone(),
                    },
                ],
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        };

        debug!("POST {}", self.completions_url);

        let mut builder = self
            .client
            .post(self.completions_url.clone())
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Engine(format!(
                "Generation request failed with status {}: {}",
                status, error_text
            )));
        }

        Ok(Self::into_chunks(response))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}
