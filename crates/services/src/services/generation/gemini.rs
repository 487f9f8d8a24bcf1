use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::{
    codec::{FramedRead, LinesCodec},
    io::StreamReader,
};

use super::{ChunkStream, GenerationClient, GenerationError};
use crate::services::config::{AssistantConfig, resolve_env};

const TASKBOARD_GEMINI_API_KEY: &str = "TASKBOARD_GEMINI_API_KEY";
const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
const API_KEY_HEADER: &str = "x-goog-api-key";
/// Longest single SSE line accepted from the endpoint.
const MAX_SSE_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, GenerationError> {
        if let Some(error) = self.error {
            return Err(GenerationError::Api(
                error.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

/// Client for the Gemini `generateContent` REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: SecretString,
}

impl GeminiClient {
    pub fn new(config: &AssistantConfig, api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        }
    }

    /// Reads the key from `TASKBOARD_GEMINI_API_KEY`, then `GEMINI_API_KEY`.
    pub fn from_env(config: &AssistantConfig) -> Result<Self, GenerationError> {
        let api_key = resolve_env(TASKBOARD_GEMINI_API_KEY, GEMINI_API_KEY)
            .ok_or(GenerationError::MissingApiKey)?;
        Ok(Self::new(config, SecretString::from(api_key)))
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.api_base, self.model, method)
    }

    async fn post(
        &self,
        url: String,
        prompt: &str,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_message(&body).unwrap_or_else(|| body.trim().to_string());
            let message = if message.is_empty() {
                format!("Generation failed with status {status}")
            } else {
                message
            };
            return Err(GenerationError::Api(message));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        tracing::debug!(model = self.model.as_str(), "generate");
        let response = self.post(self.endpoint("generateContent"), prompt).await?;
        response.json::<GenerateContentResponse>().await?.into_text()
    }

    async fn generate_stream(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        tracing::debug!(model = self.model.as_str(), "generate stream");
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(url, prompt).await?;

        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        Ok(decode_sse(body))
    }
}

/// Splits a server-sent event body into text chunks. A line longer than
/// [`MAX_SSE_LINE_BYTES`] fails the stream.
fn decode_sse<R>(body: R) -> ChunkStream
where
    R: AsyncRead + Send + 'static,
{
    FramedRead::new(body, LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES))
        .filter_map(|line| async move {
            match line {
                Ok(line) => parse_sse_line(&line).transpose(),
                Err(err) => Some(Err(GenerationError::Stream(err.to_string()))),
            }
        })
        .boxed()
}

/// Decodes one line of the server-sent event body. Lines that carry no text
/// yield `None`.
fn parse_sse_line(line: &str) -> Result<Option<String>, GenerationError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let text = serde_json::from_str::<GenerateContentResponse>(data)?.into_text()?;
    Ok((!text.is_empty()).then_some(text))
}

fn parse_error_message(body: &str) -> Option<String> {
    let parsed: ErrorEnvelope = serde_json::from_str(body).ok()?;
    parsed
        .error
        .and_then(|err| err.message)
        .filter(|message| !message.trim().is_empty())
}
