//! Error types for Lumen

use thiserror::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Lumen evaluation pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Generation engine error: {0}")]
    Engine(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Image preprocessing error: {0}")]
    Preprocess(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error signals that the engine ran out of memory or a
    /// similar size-sensitive resource.
    ///
    /// `ResourceExhausted` always qualifies. Engine-side messages qualify when
    /// they contain one of `signatures`, compared case-insensitively. Errors
    /// raised on our side of the boundary (configuration, input, image
    /// preprocessing, I/O) never do.
    pub fn is_resource_exhaustion<S: AsRef<str>>(&self, signatures: &[S]) -> bool {
        let message = match self {
            Error::ResourceExhausted(_) => return true,
            Error::Engine(msg) | Error::Network(msg) | Error::Other(msg) => msg,
            _ => return false,
        };

        let haystack = message.to_lowercase();
        signatures
            .iter()
            .map(|s| s.as_ref().to_lowercase())
            .any(|sig| !sig.is_empty() && haystack.contains(&sig))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURES: [&str; 3] = [
        "memory",
        "insufficient",
        "kIOGPUCommandBufferCallbackErrorOutOfMemory",
    ];

    #[test]
    fn test_resource_exhausted_always_matches() {
        let err = Error::ResourceExhausted("anything".to_string());
        assert!(err.is_resource_exhaustion::<&str>(&[]));
    }

    #[test]
    fn test_engine_message_matches_case_insensitively() {
        let err = Error::Engine("[METAL] Command buffer failed: Insufficient Memory".to_string());
        assert!(err.is_resource_exhaustion(&SIGNATURES));

        let err = Error::Engine(
            "status 500: kiogpucommandbuffercallbackerroroutofmemory".to_string(),
        );
        assert!(err.is_resource_exhaustion(&SIGNATURES));
    }

    #[test]
    fn test_unrelated_engine_error_does_not_match() {
        let err = Error::Engine("model not found".to_string());
        assert!(!err.is_resource_exhaustion(&SIGNATURES));
    }

    #[test]
    fn test_local_errors_never_match() {
        let err = Error::Preprocess("out of memory while decoding".to_string());
        assert!(!err.is_resource_exhaustion(&SIGNATURES));

        let err = Error::InvalidInput("memory".to_string());
        assert!(!err.is_resource_exhaustion(&SIGNATURES));
    }

    #[test]
    fn test_error_display() {
        let err = Error::Engine("boom".to_string());
        assert_eq!(err.to_string(), "Generation engine error: boom");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
