//! Generation engine configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use lumen_core::{Error, Result};

/// Configuration for the OpenAI-compatible vision engine client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the API, e.g. `http://127.0.0.1:8080/v1`
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Bound on connecting and on each read; a stream that keeps producing
    /// chunks may run longer
    pub timeout_secs: u64,
}

impl EngineConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "http://127.0.0.1:8080/v1";
    pub const DEFAULT_MODEL: &'static str = "mlx-community/Qwen2.5-VL-3B-Instruct-4bit";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let endpoint =
            env::var("LUMEN_ENDPOINT").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());

        let model = env::var("LUMEN_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        let api_key = env::var("LUMEN_API_KEY").ok().filter(|key| !key.trim().is_empty());

        let timeout_secs = match env::var("LUMEN_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Configuration(format!(
                    "LUMEN_TIMEOUT_SECS must be a whole number of seconds, got '{}'",
                    raw
                ))
            })?,
            Err(_) => Self::DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            endpoint,
            model,
            api_key,
            timeout_secs,
        })
    }

    /// Create configuration with explicit values
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// URL of the streaming chat completions route
    pub fn completions_url(&self) -> Result<url::Url> {
        let base = url::Url::parse(self.endpoint.trim_end_matches('/')).map_err(|e| {
            Error::Configuration(format!("Invalid endpoint '{}': {}", self.endpoint, e))
        })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::Configuration(format!(
                "Endpoint must use http or https, got '{}'",
                base.scheme()
            )));
        }

        url::Url::parse(&format!("{}/chat/completions", base.as_str().trim_end_matches('/')))
            .map_err(|e| Error::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_joins_path() {
        let config = EngineConfig::new("http://localhost:8080/v1/", "m");
        assert_eq!(
            config.completions_url().unwrap().as_str(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_completions_url_rejects_garbage() {
        let config = EngineConfig::new("not a url", "m");
        assert!(matches!(config.completions_url(), Err(Error::Configuration(_))));

        let config = EngineConfig::new("ftp://host/v1", "m");
        assert!(matches!(config.completions_url(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_new_uses_default_timeout() {
        let config = EngineConfig::new(EngineConfig::DEFAULT_ENDPOINT, "m");
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.api_key.is_none());
    }
}
