use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod gemini;

pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Missing Gemini API key")]
    MissingApiKey,
    #[error("Generation API error: {0}")]
    Api(String),
    #[error("Generation stream error: {0}")]
    Stream(String),
}

pub type ChunkStream = BoxStream<'static, Result<String, GenerationError>>;

/// Hosted text generation. Streams are finite and cannot be restarted;
/// dropping one abandons the underlying request.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Fails up front when the request cannot be opened. Later failures
    /// arrive as stream items.
    async fn generate_stream(&self, prompt: &str) -> Result<ChunkStream, GenerationError>;
}
